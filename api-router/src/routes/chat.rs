use std::{convert::Infallible, sync::Arc};

use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_stream::stream;
use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use common::{
    error::AppError,
    storage::types::chat_message::{Citation, MessageRole},
    utils::config::ModelsConfig,
};
use futures::StreamExt;
use retrieval_pipeline::{RetrievedChunk, SearchFilters};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::{api_state::ApiState, error::ApiError};

/// How many chunks back a chat answer.
const CHAT_K: usize = 5;

const CHAT_SYSTEM_PROMPT: &str = "You answer questions about the user's Notion workspace. \
Ground every answer in the provided context. If the context does not contain the answer, \
say so instead of guessing.";

const NO_RESULTS_EN: &str = "Sorry, I couldn't find any documents in your Notion workspace \
related to your question. Try rephrasing your question, or make sure the relevant content \
has been synced to your workspace.";

const NO_RESULTS_ZH: &str = "很抱歉，我在您的 Notion 工作区中没有找到与您的问题相关的文档。\
请尝试重新表述您的问题，或确保相关内容已同步到您的工作区。";

#[derive(Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub filters: SearchFilters,
}

fn default_stream() -> bool {
    true
}

#[derive(Deserialize, Clone)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

/// What the persistence collector receives from the SSE forwarder.
enum Collected {
    Delta(String),
    Fail,
}

/// Chat over the retrieval core. Streams SSE frames
/// (`data: {"content": ...}` deltas, one citations frame, then
/// `data: [DONE]`); an empty retrieval short-circuits to a localized
/// no-results message without touching the LLM.
pub async fn chat_handler(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let Some(user_message) = request
        .messages
        .iter()
        .rev()
        .find(|message| message.role == "user")
        .map(|message| message.content.clone())
    else {
        return Err(ApiError::bad_request("request contains no user message"));
    };

    if let Some(session_id) = &request.session_id {
        state
            .session_manager
            .append_message(
                session_id,
                MessageRole::User,
                user_message.clone(),
                Vec::new(),
                None,
            )
            .await?;
    }

    let results = retrieval_pipeline::search(
        &state.db,
        &state.embedder,
        &state.field_definitions,
        &user_message,
        &request.filters,
        CHAT_K,
        &state.retrieval,
    )
    .await?;

    if results.is_empty() {
        info!("no retrieval results, short-circuiting chat");
        return Ok(no_results_response(&state, &request, &user_message).await);
    }

    let citations: Vec<Citation> = results
        .iter()
        .map(|result| Citation {
            chunk_id: result.chunk_id.clone(),
            document_id: result.document_id.clone(),
            document_title: result.document_title.clone(),
            page_url: result.page_url.clone(),
        })
        .collect();

    let context_used = json!({
        "query": user_message,
        "top_k": CHAT_K,
        "result_count": results.len(),
        "chunk_ids": results.iter().map(|r| r.chunk_id.clone()).collect::<Vec<_>>(),
        "final_scores": results.iter().map(|r| r.final_score).collect::<Vec<_>>(),
    });

    let system_prompt = build_system_prompt(&results);
    let llm_request = build_llm_request(&state.models, &system_prompt, &request.messages)?;

    if !request.stream {
        return blocking_chat(&state, &request, llm_request, citations, context_used).await;
    }

    let llm_stream = match state.chat_client.chat().create_stream(llm_request).await {
        Ok(stream) => stream,
        Err(err) => {
            error!(error = %err, "failed to open chat completion stream");
            return Ok(error_sse(format!("Failed to start chat stream: {err}")));
        }
    };

    // Collector task: persists whatever was actually streamed to the client
    // once the forwarding side closes the channel, so the stored message
    // matches what the user saw even on disconnect.
    let (tx, mut rx) = mpsc::channel::<Collected>(256);
    let (persisted_tx, mut persisted_rx) = mpsc::channel::<()>(1);
    let manager = Arc::clone(&state.session_manager);
    let session_for_store = request.session_id.clone();
    let citations_for_store = citations.clone();
    tokio::spawn(async move {
        let mut content = String::new();
        let mut failed = false;
        while let Some(event) = rx.recv().await {
            match event {
                Collected::Delta(delta) => content.push_str(&delta),
                Collected::Fail => failed = true,
            }
        }

        if failed || content.trim().is_empty() {
            return;
        }
        let Some(session_id) = session_for_store else {
            return;
        };

        match manager
            .append_message(
                &session_id,
                MessageRole::Assistant,
                content,
                citations_for_store,
                Some(context_used),
            )
            .await
        {
            Ok(_) => {
                let _ = persisted_tx.send(()).await;
            }
            Err(err) => {
                error!(error = %err, "failed to persist assistant message");
            }
        }
    });

    let citations_frame = json!({ "citations": citations }).to_string();
    let event_stream = stream! {
        let mut llm_stream = llm_stream;
        let mut stream_failed = false;

        while let Some(chunk) = llm_stream.next().await {
            match chunk {
                Ok(response) => {
                    let delta = response
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.clone())
                        .unwrap_or_default();
                    if !delta.is_empty() {
                        let _ = tx.send(Collected::Delta(delta.clone())).await;
                        yield Ok::<Event, Infallible>(
                            Event::default().data(json!({ "content": delta }).to_string()),
                        );
                    }
                }
                Err(err) => {
                    error!(error = %err, "chat completion stream failed");
                    let _ = tx.send(Collected::Fail).await;
                    yield Ok(Event::default().data(json!({ "error": err.to_string() }).to_string()));
                    stream_failed = true;
                    break;
                }
            }
        }

        drop(tx);

        if !stream_failed {
            yield Ok(Event::default().data(citations_frame));
            // The assistant message lands before the DONE sentinel.
            let _ = persisted_rx.recv().await;
        }

        yield Ok(Event::default().data("[DONE]"));
    };

    Ok(Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// Non-streaming variant: one JSON body with the answer and citations.
async fn blocking_chat(
    state: &ApiState,
    request: &ChatRequest,
    llm_request: CreateChatCompletionRequest,
    citations: Vec<Citation>,
    context_used: serde_json::Value,
) -> Result<Response, ApiError> {
    let response = state
        .chat_client
        .chat()
        .create(llm_request)
        .await
        .map_err(AppError::from)?;

    let answer = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))?;

    if let Some(session_id) = &request.session_id {
        state
            .session_manager
            .append_message(
                session_id,
                MessageRole::Assistant,
                answer.clone(),
                citations.clone(),
                Some(context_used),
            )
            .await?;
    }

    Ok(Json(json!({ "answer": answer, "citations": citations })).into_response())
}

/// Localized short-circuit when retrieval comes back empty. No LLM call is
/// made; the canned message is still persisted so the session transcript
/// matches what the user saw.
async fn no_results_response(
    state: &ApiState,
    request: &ChatRequest,
    user_message: &str,
) -> Response {
    let message = if contains_cjk(user_message) {
        NO_RESULTS_ZH
    } else {
        NO_RESULTS_EN
    };

    if let Some(session_id) = &request.session_id {
        if let Err(err) = state
            .session_manager
            .append_message(
                session_id,
                MessageRole::Assistant,
                message.to_string(),
                Vec::new(),
                Some(json!({ "no_results": true })),
            )
            .await
        {
            error!(error = %err, "failed to persist no-results message");
        }
    }

    if !request.stream {
        return Json(json!({ "answer": message, "citations": [] })).into_response();
    }

    let event_stream = stream! {
        yield Ok::<Event, Infallible>(
            Event::default().data(json!({ "content": message }).to_string()),
        );
        yield Ok(Event::default().data(json!({ "citations": [] }).to_string()));
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(event_stream).into_response()
}

fn error_sse(message: String) -> Response {
    let event_stream = stream! {
        yield Ok::<Event, Infallible>(
            Event::default().data(json!({ "error": message }).to_string()),
        );
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(event_stream).into_response()
}

fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// System prompt carrying the enriched context blocks, numbered for
/// citation.
fn build_system_prompt(results: &[RetrievedChunk]) -> String {
    let mut prompt = String::from(CHAT_SYSTEM_PROMPT);
    prompt.push_str("\n\nContext:\n");
    for (index, result) in results.iter().enumerate() {
        prompt.push_str(&format!(
            "\n[{}] {} ({})\n{}\n",
            index.saturating_add(1),
            result.document_title,
            result.page_url,
            result.enriched_content
        ));
    }
    prompt
}

fn build_llm_request(
    models: &ModelsConfig,
    system_prompt: &str,
    messages: &[IncomingMessage],
) -> Result<CreateChatCompletionRequest, AppError> {
    let mut chat_messages: Vec<ChatCompletionRequestMessage> =
        vec![ChatCompletionRequestSystemMessage::from(system_prompt).into()];

    for message in messages {
        match message.role.as_str() {
            "assistant" => {
                chat_messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(message.content.clone())
                        .build()?
                        .into(),
                );
            }
            _ => {
                chat_messages
                    .push(ChatCompletionRequestUserMessage::from(message.content.clone()).into());
            }
        }
    }

    let request = CreateChatCompletionRequestArgs::default()
        .model(&models.chat_model)
        .temperature(models.temperature)
        .max_tokens(models.max_tokens)
        .messages(chat_messages)
        .build()?;

    Ok(request)
}
