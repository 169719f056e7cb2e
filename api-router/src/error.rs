use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced over HTTP. Client mistakes keep their message; internal
/// failures collapse to a stable machine-readable code and the detail stays
/// in the logs.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { message: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("internal failure ({code})")]
    Internal { code: &'static str },
}

/// Wire shape of every error body: a stable `code` for clients to branch
/// on, plus a human-readable message.
#[derive(Serialize, Debug)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            Self::BadRequest { message } => ErrorBody {
                code: "invalid_request",
                message: message.clone(),
            },
            Self::NotFound { message } => ErrorBody {
                code: "not_found",
                message: message.clone(),
            },
            // Internal detail never leaks to clients; only the code does.
            Self::Internal { code } => ErrorBody {
                code,
                message: "Internal server error".to_string(),
            },
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let code = match &err {
            AppError::NotFound(message) => {
                return Self::NotFound {
                    message: message.clone(),
                }
            }
            AppError::Validation(message) => {
                return Self::BadRequest {
                    message: message.clone(),
                }
            }
            AppError::Store(_) => "store_failure",
            AppError::Embedding(_) => "embedding_failure",
            AppError::Provider(_) | AppError::LLMParsing(_) => "llm_failure",
            AppError::Notion(_) => "page_source_failure",
            _ => "internal_error",
        };

        tracing::error!(error = ?err, code, "request failed");
        Self::Internal { code }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_keep_their_message() {
        let not_found = ApiError::from(AppError::NotFound("session s1".to_string()));
        assert!(matches!(&not_found, ApiError::NotFound { message } if message == "session s1"));
        let body = not_found.body();
        assert_eq!(body.code, "not_found");
        assert_eq!(body.message, "session s1");

        let bad = ApiError::from(AppError::Validation("limit out of range".to_string()));
        assert!(matches!(&bad, ApiError::BadRequest { message } if message == "limit out of range"));
        assert_eq!(bad.body().code, "invalid_request");
    }

    #[test]
    fn test_remote_failures_map_to_stable_codes() {
        let embedding = ApiError::from(AppError::Embedding("provider said no".to_string()));
        assert!(matches!(
            embedding,
            ApiError::Internal {
                code: "embedding_failure"
            }
        ));

        let llm = ApiError::from(AppError::LLMParsing("empty choice".to_string()));
        assert!(matches!(llm, ApiError::Internal { code: "llm_failure" }));

        let notion = ApiError::from(AppError::Notion("401 unauthorized".to_string()));
        assert!(matches!(
            notion,
            ApiError::Internal {
                code: "page_source_failure"
            }
        ));

        let io = ApiError::from(AppError::Io(std::io::Error::other("disk gone")));
        assert!(matches!(
            io,
            ApiError::Internal {
                code: "internal_error"
            }
        ));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::bad_request("nope").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::not_found("missing").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Internal {
                code: "store_failure"
            }
            .into_response()
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_is_not_leaked() {
        let error = ApiError::from(AppError::Internal("db password incorrect".to_string()));
        let body = error.body();
        assert_eq!(body.code, "internal_error");
        assert_eq!(body.message, "Internal server error");
        assert!(!format!("{body:?}").contains("password"));
    }
}
