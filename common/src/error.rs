use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Error kinds of the ingestion/retrieval core.
///
/// Remote failures keep their source error; the policy for each kind
/// (retry, fall back to a deterministic value, fail the page, surface over
/// HTTP) lives with the callers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("store failure: {0}")]
    Store(#[from] surrealdb::Error),
    #[error("provider failure: {0}")]
    Provider(#[from] OpenAIError),
    #[error("embedding failure: {0}")]
    Embedding(String),
    #[error("unusable llm output: {0}")]
    LLMParsing(String),
    #[error("page source failure: {0}")]
    Notion(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("processing failure: {0}")]
    Processing(String),
    #[error("task join failure: {0}")]
    Join(#[from] JoinError),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("http failure: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error("internal invariant violated: {0}")]
    Internal(String),
}
