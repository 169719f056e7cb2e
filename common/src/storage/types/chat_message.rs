#![allow(clippy::module_name_repetitions)]
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A retrieval source attached to an assistant message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub page_url: String,
}

stored_object!(ChatMessage, "chat_message", {
    session_id: String,
    role: MessageRole,
    content: String,
    message_order: u32,
    citations: Vec<Citation>,
    context_used: Option<serde_json::Value>
});

impl ChatMessage {
    pub fn new(
        session_id: String,
        role: MessageRole,
        content: String,
        message_order: u32,
        citations: Vec<Citation>,
        context_used: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            role,
            content,
            message_order,
            citations,
            context_used,
        }
    }

    /// Orders are dense (0..message_count), so the next order equals the
    /// number of stored messages.
    pub async fn next_order(session_id: &str, db: &SurrealDbClient) -> Result<u32, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: u32,
        }

        let mut response = db
            .client
            .query(format!(
                "SELECT count() AS count FROM {} WHERE session_id = $session_id GROUP ALL",
                Self::table_name()
            ))
            .bind(("session_id", session_id.to_string()))
            .await?;

        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.first().map_or(0, |row| row.count))
    }

    pub async fn list_for_session(
        session_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE session_id = $session_id ORDER BY message_order ASC",
                Self::table_name()
            ))
            .bind(("session_id", session_id.to_string()))
            .await?
            .take(0)?;

        Ok(rows)
    }

    pub async fn first_user_message(
        session_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let rows: Vec<Self> = db
            .client
            .query(format!(
                "SELECT * FROM {} WHERE session_id = $session_id AND role = 'user' ORDER BY message_order ASC LIMIT 1",
                Self::table_name()
            ))
            .bind(("session_id", session_id.to_string()))
            .await?
            .take(0)?;

        Ok(rows.into_iter().next())
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

// helper function to format a slice of messages for LLM prompts
pub fn format_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|msg| format!("{msg}"))
        .collect::<Vec<String>>()
        .join("\n")
}
