use axum::{
    routing::{get, post},
    Router,
};

pub mod api_state;
pub mod error;
mod routes;

use api_state::ApiState;
use routes::{
    chat::chat_handler,
    probes::{live, ready},
    search::search_handler,
    sessions::{
        conclude_session_handler, create_session_handler, get_session_handler,
        list_sessions_handler, resume_session_handler,
    },
    webhook::webhook_handler,
};

/// The HTTP surface: search, streaming chat, the page-source webhook,
/// session CRUD and the service probes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/search", post(search_handler))
        .route("/chat", post(chat_handler))
        .route("/notion/webhook", post(webhook_handler))
        .route(
            "/api/chat-sessions",
            get(list_sessions_handler).post(create_session_handler),
        )
        .route("/api/chat-sessions/{id}", get(get_session_handler))
        .route(
            "/api/chat-sessions/{id}/conclude",
            post(conclude_session_handler),
        )
        .route(
            "/api/chat-sessions/{id}/resume",
            post(resume_session_handler),
        )
        .with_state(state)
}
