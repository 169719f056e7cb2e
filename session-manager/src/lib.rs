pub mod idle;

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            chat_message::{format_history, ChatMessage, Citation, MessageRole},
            chat_session::{ChatSession, SessionStatus},
        },
    },
    utils::llm::ChatCompleter,
};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

const TITLE_SYSTEM_MESSAGE: &str =
    "You write short conversation titles. Reply with a title of at most 8 words, nothing else.";

const SUMMARY_SYSTEM_MESSAGE: &str =
    "You summarize conversations. Reply with a 2-3 sentence summary, nothing else.";

/// Number of leading messages fed to the summary call.
const SUMMARY_MESSAGE_LIMIT: usize = 12;

const DEFAULT_TITLE: &str = "New Chat";

/// Session lifecycle coordinator.
///
/// Holds the single serialization point for every transition into the
/// `active` state and for per-session appends, which is what upholds the
/// at-most-one-active-session invariant under concurrent requests.
pub struct SessionManager {
    db: Arc<SurrealDbClient>,
    chat: Arc<dyn ChatCompleter>,
    transitions: Mutex<()>,
}

impl SessionManager {
    pub fn new(db: Arc<SurrealDbClient>, chat: Arc<dyn ChatCompleter>) -> Self {
        Self {
            db,
            chat,
            transitions: Mutex::new(()),
        }
    }

    /// Create a fresh active session, concluding whichever session held the
    /// active slot before.
    pub async fn create_session(&self) -> Result<ChatSession, AppError> {
        let _guard = self.transitions.lock().await;

        if let Some(active) = ChatSession::find_active(&self.db).await? {
            self.retire(&active, "new_chat").await?;
        }

        let session = ChatSession::new(DEFAULT_TITLE.to_string());
        self.db
            .insert(session.clone())
            .await?
            .ok_or_else(|| AppError::Internal("session insert returned no row".into()))?;

        info!(session_id = %session.id, "session created");
        Ok(session)
    }

    /// Make `target_id` the single active session: conclude the current one
    /// if different, resume the target if it was concluded.
    pub async fn ensure_single_active_session(
        &self,
        target_id: &str,
    ) -> Result<ChatSession, AppError> {
        let _guard = self.transitions.lock().await;
        self.activate_locked(target_id).await
    }

    async fn activate_locked(&self, target_id: &str) -> Result<ChatSession, AppError> {
        let target = ChatSession::get_required(target_id, &self.db).await?;

        if let Some(active) = ChatSession::find_active(&self.db).await? {
            if active.id != target_id {
                info!(
                    concluded = %active.id,
                    activated = %target_id,
                    "concluding previous active session"
                );
                self.retire(&active, "resume_other").await?;
            }
        }

        if target.status == SessionStatus::Concluded {
            ChatSession::set_status(target_id, SessionStatus::Active, &self.db).await?;
        }

        ChatSession::get_required(target_id, &self.db).await
    }

    /// Append a message with a dense, strictly increasing order. A
    /// concluded session is resumed first; the session counters update with
    /// the append.
    #[instrument(skip_all, fields(session_id = %session_id, role = %role))]
    pub async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: String,
        citations: Vec<Citation>,
        context_used: Option<serde_json::Value>,
    ) -> Result<ChatMessage, AppError> {
        let _guard = self.transitions.lock().await;

        self.activate_locked(session_id).await?;

        let order = ChatMessage::next_order(session_id, &self.db).await?;
        let message = ChatMessage::new(
            session_id.to_string(),
            role,
            content,
            order,
            citations,
            context_used,
        );

        self.db
            .insert(message.clone())
            .await?
            .ok_or_else(|| AppError::Internal("message insert returned no row".into()))?;
        ChatSession::record_message(session_id, message.created_at, &self.db).await?;

        Ok(message)
    }

    /// Title policy: a short first user message is used verbatim (8 words
    /// for Latin text, 8 characters when CJK-heavy); longer ones go through
    /// the LLM with truncation as the fallback.
    pub async fn generate_title(&self, session_id: &str) -> Result<String, AppError> {
        let Some(first) = ChatMessage::first_user_message(session_id, &self.db).await? else {
            return Ok(DEFAULT_TITLE.to_string());
        };
        let text = first.content.trim().to_string();
        if text.is_empty() {
            return Ok(DEFAULT_TITLE.to_string());
        }

        if let Some(title) = verbatim_title(&text) {
            return Ok(title);
        }

        match self.chat.complete(TITLE_SYSTEM_MESSAGE, &text).await {
            Ok(title) if !title.trim().is_empty() => Ok(clip_title(title.trim())),
            Ok(_) | Err(_) => {
                warn!(session_id, "title generation failed, truncating first message");
                Ok(clip_title(&text))
            }
        }
    }

    /// Summarize the first messages of the session. Returns `None` when the
    /// conversation is too short or the LLM call fails.
    pub async fn generate_summary(&self, session_id: &str) -> Result<Option<String>, AppError> {
        let messages = ChatMessage::list_for_session(session_id, &self.db).await?;
        if messages.len() < 2 {
            return Ok(None);
        }

        let window: Vec<ChatMessage> =
            messages.into_iter().take(SUMMARY_MESSAGE_LIMIT).collect();
        match self
            .chat
            .complete(SUMMARY_SYSTEM_MESSAGE, &format_history(&window))
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => Ok(Some(summary.trim().to_string())),
            Ok(_) => Ok(None),
            Err(err) => {
                warn!(session_id, error = %err, "summary generation failed");
                Ok(None)
            }
        }
    }

    /// Conclude a session: regenerate the title when it changed, fill in a
    /// missing summary, flip the status. Sessions with fewer than two
    /// messages are left untouched.
    #[instrument(skip_all, fields(session_id = %session_id, reason = reason))]
    pub async fn conclude_session(&self, session_id: &str, reason: &str) -> Result<bool, AppError> {
        let _guard = self.transitions.lock().await;
        self.conclude_locked(session_id, reason).await
    }

    async fn conclude_locked(&self, session_id: &str, reason: &str) -> Result<bool, AppError> {
        let session = ChatSession::get_required(session_id, &self.db).await?;

        if session.message_count < 2 {
            info!(
                message_count = session.message_count,
                "session too short to conclude"
            );
            return Ok(false);
        }

        let title = self.generate_title(session_id).await?;
        if title != DEFAULT_TITLE && title != session.title {
            ChatSession::update_title(session_id, &title, &self.db).await?;
        }

        if session.summary.is_none() {
            if let Some(summary) = self.generate_summary(session_id).await? {
                ChatSession::update_summary(session_id, &summary, &self.db).await?;
            }
        }

        if session.status == SessionStatus::Active {
            ChatSession::set_status(session_id, SessionStatus::Concluded, &self.db).await?;
        }

        info!(reason, "session concluded");
        Ok(true)
    }

    /// Push a session out of the active slot. Short sessions are closed
    /// without the title/summary work.
    async fn retire(&self, session: &ChatSession, reason: &str) -> Result<(), AppError> {
        if session.message_count >= 2 {
            self.conclude_locked(&session.id, reason).await?;
        } else {
            ChatSession::set_status(&session.id, SessionStatus::Concluded, &self.db).await?;
        }
        Ok(())
    }

    pub fn db(&self) -> &Arc<SurrealDbClient> {
        &self.db
    }
}

/// More than 30% CJK ideographs means character-based length rules.
fn is_cjk_heavy(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let cjk = text
        .chars()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
        .count();
    cjk.saturating_mul(10) > total.saturating_mul(3)
}

/// Short first messages become the title verbatim.
fn verbatim_title(text: &str) -> Option<String> {
    if is_cjk_heavy(text) {
        if text.chars().count() <= 8 {
            return Some(text.to_string());
        }
    } else if text.split_whitespace().count() <= 8 {
        return Some(text.to_string());
    }
    None
}

/// Clamp to the 8 words / 8 chars rule.
fn clip_title(text: &str) -> String {
    if is_cjk_heavy(text) {
        text.chars().take(8).collect()
    } else {
        text.split_whitespace()
            .take(8)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::llm::testing::CannedChat;
    use uuid::Uuid;

    async fn setup(chat: Arc<dyn ChatCompleter>) -> (SessionManager, Arc<SurrealDbClient>) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("initialize schema");
        (SessionManager::new(Arc::clone(&db), chat), db)
    }

    async fn active_count(db: &SurrealDbClient) -> usize {
        db.fetch_all::<ChatSession>()
            .await
            .expect("fetch sessions")
            .into_iter()
            .filter(|session| session.status == SessionStatus::Active)
            .count()
    }

    #[tokio::test]
    async fn test_create_session_concludes_previous_active() {
        let chat = Arc::new(CannedChat::replying("Generated title"));
        let (manager, db) = setup(chat).await;

        let first = manager.create_session().await.expect("create first");
        assert_eq!(active_count(&db).await, 1);

        let second = manager.create_session().await.expect("create second");
        assert_ne!(first.id, second.id);
        assert_eq!(active_count(&db).await, 1);

        let first_row = ChatSession::get_required(&first.id, &db)
            .await
            .expect("fetch first");
        assert_eq!(first_row.status, SessionStatus::Concluded);
    }

    #[tokio::test]
    async fn test_single_active_invariant_across_resume_cycles() {
        let chat = Arc::new(CannedChat::replying("Generated title"));
        let (manager, db) = setup(chat).await;

        let a = manager.create_session().await.expect("create a");
        let b = manager.create_session().await.expect("create b");
        let c = manager.create_session().await.expect("create c");

        for target in [&a.id, &b.id, &c.id, &a.id] {
            let activated = manager
                .ensure_single_active_session(target)
                .await
                .expect("activate");
            assert_eq!(&activated.id, target);
            assert_eq!(activated.status, SessionStatus::Active);
            assert_eq!(active_count(&db).await, 1);
        }
    }

    #[tokio::test]
    async fn test_append_message_keeps_dense_order_and_counters() {
        let chat = Arc::new(CannedChat::replying("ok"));
        let (manager, db) = setup(chat).await;

        let session = manager.create_session().await.expect("create");
        for (index, content) in ["hi", "hello", "how are you?"].iter().enumerate() {
            let role = if index % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            let message = manager
                .append_message(&session.id, role, (*content).to_string(), Vec::new(), None)
                .await
                .expect("append");
            assert_eq!(message.message_order as usize, index);
        }

        let row = ChatSession::get_required(&session.id, &db)
            .await
            .expect("fetch");
        assert_eq!(row.message_count, 3);
        assert!(row.last_message_at.is_some());

        let orders: Vec<u32> = ChatMessage::list_for_session(&session.id, &db)
            .await
            .expect("list")
            .into_iter()
            .map(|m| m.message_order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_append_resumes_concluded_session() {
        let chat = Arc::new(CannedChat::replying("ok"));
        let (manager, db) = setup(chat).await;

        let session = manager.create_session().await.expect("create");
        ChatSession::set_status(&session.id, SessionStatus::Concluded, &db)
            .await
            .expect("conclude directly");

        manager
            .append_message(
                &session.id,
                MessageRole::User,
                "back again".to_string(),
                Vec::new(),
                None,
            )
            .await
            .expect("append");

        let row = ChatSession::get_required(&session.id, &db)
            .await
            .expect("fetch");
        assert_eq!(row.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_short_first_message_is_title_verbatim() {
        let chat = Arc::new(CannedChat::replying("LLM title that should not be used"));
        let (manager, _db) = setup(Arc::clone(&chat) as Arc<dyn ChatCompleter>).await;

        let session = manager.create_session().await.expect("create");
        manager
            .append_message(
                &session.id,
                MessageRole::User,
                "how do webhooks work?".to_string(),
                Vec::new(),
                None,
            )
            .await
            .expect("append");

        let title = manager.generate_title(&session.id).await.expect("title");
        assert_eq!(title, "how do webhooks work?");
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn test_long_first_message_goes_through_llm() {
        let chat = Arc::new(CannedChat::replying("Webhook sync behavior"));
        let (manager, _db) = setup(Arc::clone(&chat) as Arc<dyn ChatCompleter>).await;

        let session = manager.create_session().await.expect("create");
        manager
            .append_message(
                &session.id,
                MessageRole::User,
                "could you explain to me in detail how the webhook sync behavior works here?"
                    .to_string(),
                Vec::new(),
                None,
            )
            .await
            .expect("append");

        let title = manager.generate_title(&session.id).await.expect("title");
        assert_eq!(title, "Webhook sync behavior");
        assert_eq!(chat.call_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_first_eight_words() {
        let chat = Arc::new(CannedChat::failing());
        let (manager, _db) = setup(chat).await;

        let session = manager.create_session().await.expect("create");
        manager
            .append_message(
                &session.id,
                MessageRole::User,
                "one two three four five six seven eight nine ten".to_string(),
                Vec::new(),
                None,
            )
            .await
            .expect("append");

        let title = manager.generate_title(&session.id).await.expect("title");
        assert_eq!(title, "one two three four five six seven eight");
    }

    #[tokio::test]
    async fn test_cjk_title_rules() {
        assert!(is_cjk_heavy("什么是量子纠缠？"));
        assert!(!is_cjk_heavy("plain english text"));

        // Short CJK message: verbatim.
        assert_eq!(verbatim_title("量子纠缠"), Some("量子纠缠".to_string()));
        // Nine ideographs: too long for the 8-character rule.
        assert_eq!(verbatim_title("量子纠缠是什么东西"), None);
        assert_eq!(clip_title("量子纠缠是什么东西"), "量子纠缠是什么东");
    }

    #[tokio::test]
    async fn test_conclude_requires_two_messages() {
        let chat = Arc::new(CannedChat::replying("Title"));
        let (manager, db) = setup(chat).await;

        let session = manager.create_session().await.expect("create");
        manager
            .append_message(
                &session.id,
                MessageRole::User,
                "hi".to_string(),
                Vec::new(),
                None,
            )
            .await
            .expect("append");

        let concluded = manager
            .conclude_session(&session.id, "manual")
            .await
            .expect("conclude");
        assert!(!concluded);

        let row = ChatSession::get_required(&session.id, &db)
            .await
            .expect("fetch");
        assert_eq!(row.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_conclude_sets_title_summary_and_status() {
        let chat = Arc::new(CannedChat::replying("Ingestion pipeline help"));
        let (manager, db) = setup(chat).await;

        let session = manager.create_session().await.expect("create");
        manager
            .append_message(
                &session.id,
                MessageRole::User,
                "please walk me through every stage of the ingestion pipeline and its behavior"
                    .to_string(),
                Vec::new(),
                None,
            )
            .await
            .expect("append user");
        manager
            .append_message(
                &session.id,
                MessageRole::Assistant,
                "sure, here is how it works".to_string(),
                Vec::new(),
                None,
            )
            .await
            .expect("append assistant");

        let concluded = manager
            .conclude_session(&session.id, "idle")
            .await
            .expect("conclude");
        assert!(concluded);

        let row = ChatSession::get_required(&session.id, &db)
            .await
            .expect("fetch");
        assert_eq!(row.status, SessionStatus::Concluded);
        assert_eq!(row.title, "Ingestion pipeline help");
        assert_eq!(row.summary.as_deref(), Some("Ingestion pipeline help"));
    }

    #[tokio::test]
    async fn test_operations_on_missing_session_return_not_found() {
        let chat = Arc::new(CannedChat::replying("ok"));
        let (manager, _db) = setup(chat).await;

        let result = manager.conclude_session("missing", "manual").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let result = manager.ensure_single_active_session("missing").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
