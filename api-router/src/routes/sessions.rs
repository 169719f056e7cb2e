use axum::{
    extract::{Path, State},
    Json,
};
use common::storage::types::{
    chat_message::ChatMessage,
    chat_session::ChatSession,
};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

const SESSION_LIST_LIMIT: usize = 50;

#[derive(Serialize)]
pub struct SessionWithMessages {
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
}

#[derive(Deserialize, Default)]
pub struct ConcludeRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct ConcludeResponse {
    pub concluded: bool,
    pub session: ChatSession,
}

pub async fn list_sessions_handler(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    let sessions = ChatSession::list_recent(&state.db, SESSION_LIST_LIMIT).await?;
    Ok(Json(sessions))
}

pub async fn create_session_handler(
    State(state): State<ApiState>,
) -> Result<Json<ChatSession>, ApiError> {
    let session = state.session_manager.create_session().await?;
    Ok(Json(session))
}

pub async fn get_session_handler(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionWithMessages>, ApiError> {
    let session = ChatSession::get_required(&session_id, &state.db).await?;
    let messages = ChatMessage::list_for_session(&session_id, &state.db).await?;
    Ok(Json(SessionWithMessages { session, messages }))
}

pub async fn conclude_session_handler(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    request: Option<Json<ConcludeRequest>>,
) -> Result<Json<ConcludeResponse>, ApiError> {
    let reason = request
        .and_then(|Json(r)| r.reason)
        .unwrap_or_else(|| "manual".to_string());

    let concluded = state
        .session_manager
        .conclude_session(&session_id, &reason)
        .await?;
    let session = ChatSession::get_required(&session_id, &state.db).await?;

    Ok(Json(ConcludeResponse { concluded, session }))
}

pub async fn resume_session_handler(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<ChatSession>, ApiError> {
    let session = state
        .session_manager
        .ensure_single_active_session(&session_id)
        .await?;
    Ok(Json(session))
}
