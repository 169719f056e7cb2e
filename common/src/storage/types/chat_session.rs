use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
    stored_object,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Concluded,
}

stored_object!(ChatSession, "chat_session", {
    title: String,
    summary: Option<String>,
    status: SessionStatus,
    message_count: u32,
    #[serde(with = "crate::storage::types::serde_helpers::optional_datetime", default)]
    last_message_at: Option<DateTime<Utc>>
});

impl ChatSession {
    pub fn new(title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            title,
            summary: None,
            status: SessionStatus::Active,
            message_count: 0,
            last_message_at: None,
        }
    }

    pub async fn get_required(session_id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.fetch(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session not found: {session_id}")))
    }

    /// The session currently holding the single active slot, if any.
    pub async fn find_active(db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let rows: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE status = 'active'")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(rows.into_iter().next())
    }

    /// Active sessions that have gone quiet: at least two messages and no
    /// activity since the cutoff. These are the idle-monitor candidates.
    pub async fn find_idle(
        cutoff: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE status = 'active' AND message_count >= 2 AND last_message_at < $cutoff",
            )
            .bind(("table", Self::table_name()))
            .bind(("cutoff", surrealdb::sql::Datetime::from(cutoff)))
            .await?
            .take(0)?;

        Ok(rows)
    }

    pub async fn set_status(
        session_id: &str,
        status: SessionStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET status = $status, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", session_id.to_string()))
            .bind(("status", status))
            .await?;

        Ok(())
    }

    /// Bump the message counters after an append. The count mutation happens
    /// store-side so concurrent readers never observe a stale pair.
    pub async fn record_message(
        session_id: &str,
        at: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET message_count += 1, last_message_at = $at, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", session_id.to_string()))
            .bind(("at", surrealdb::sql::Datetime::from(at)))
            .await?;

        Ok(())
    }

    pub async fn update_title(
        session_id: &str,
        title: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("UPDATE type::thing($table, $id) SET title = $title, updated_at = time::now()")
            .bind(("table", Self::table_name()))
            .bind(("id", session_id.to_string()))
            .bind(("title", title.to_string()))
            .await?;

        Ok(())
    }

    pub async fn update_summary(
        session_id: &str,
        summary: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET summary = $summary, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", session_id.to_string()))
            .bind(("summary", summary.to_string()))
            .await?;

        Ok(())
    }

    pub async fn list_recent(db: &SurrealDbClient, limit: usize) -> Result<Vec<Self>, AppError> {
        let rows: Vec<Self> = db
            .client
            .query(format!(
                "SELECT * FROM {} ORDER BY updated_at DESC LIMIT {limit}",
                Self::table_name()
            ))
            .await?
            .take(0)?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_new_session_starts_active_and_empty() {
        let session = ChatSession::new("New chat".to_string());
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.message_count, 0);
        assert!(session.summary.is_none());
        assert!(session.last_message_at.is_none());
    }

    #[tokio::test]
    async fn test_find_active_returns_only_active() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let mut concluded = ChatSession::new("Old".to_string());
        concluded.status = SessionStatus::Concluded;
        db.insert(concluded).await.expect("store concluded");

        assert!(ChatSession::find_active(&db)
            .await
            .expect("query")
            .is_none());

        let active = ChatSession::new("Current".to_string());
        db.insert(active.clone()).await.expect("store active");

        let found = ChatSession::find_active(&db).await.expect("query");
        assert_eq!(found.map(|s| s.id), Some(active.id));
    }

    #[tokio::test]
    async fn test_record_message_increments_count() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let session = ChatSession::new("Counting".to_string());
        let session_id = session.id.clone();
        db.insert(session).await.expect("store");

        let at = Utc::now();
        ChatSession::record_message(&session_id, at, &db)
            .await
            .expect("record first");
        ChatSession::record_message(&session_id, at, &db)
            .await
            .expect("record second");

        let row = ChatSession::get_required(&session_id, &db)
            .await
            .expect("fetch");
        assert_eq!(row.message_count, 2);
        assert!(row.last_message_at.is_some());
    }

    #[tokio::test]
    async fn test_find_idle_applies_all_conditions() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let now = Utc::now();
        let cutoff = now - Duration::minutes(10);

        // Idle candidate: active, two messages, stale.
        let mut idle = ChatSession::new("Idle".to_string());
        idle.message_count = 2;
        idle.last_message_at = Some(now - Duration::minutes(11));
        let idle_id = idle.id.clone();
        db.insert(idle).await.expect("store idle");

        // Too fresh.
        let mut fresh = ChatSession::new("Fresh".to_string());
        fresh.message_count = 4;
        fresh.last_message_at = Some(now - Duration::minutes(1));
        db.insert(fresh).await.expect("store fresh");

        // Too few messages.
        let mut short = ChatSession::new("Short".to_string());
        short.message_count = 1;
        short.last_message_at = Some(now - Duration::minutes(30));
        db.insert(short).await.expect("store short");

        // Already concluded.
        let mut concluded = ChatSession::new("Done".to_string());
        concluded.message_count = 5;
        concluded.status = SessionStatus::Concluded;
        concluded.last_message_at = Some(now - Duration::minutes(30));
        db.insert(concluded).await.expect("store concluded");

        let idle_sessions = ChatSession::find_idle(cutoff, &db).await.expect("query");
        assert_eq!(idle_sessions.len(), 1);
        assert_eq!(idle_sessions[0].id, idle_id);
    }

    #[tokio::test]
    async fn test_title_and_summary_updates() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let session = ChatSession::new("Before".to_string());
        let session_id = session.id.clone();
        db.insert(session).await.expect("store");

        ChatSession::update_title(&session_id, "After", &db)
            .await
            .expect("update title");
        ChatSession::update_summary(&session_id, "Covered ingestion basics.", &db)
            .await
            .expect("update summary");

        let row = ChatSession::get_required(&session_id, &db)
            .await
            .expect("fetch");
        assert_eq!(row.title, "After");
        assert_eq!(row.summary.as_deref(), Some("Covered ingestion basics."));
    }

    #[tokio::test]
    async fn test_get_required_missing_session() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        let result = ChatSession::get_required("missing", &db).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
