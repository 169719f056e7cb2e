use std::{sync::Arc, time::Duration};

use chrono::Utc;
use common::{error::AppError, storage::types::chat_session::ChatSession};
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{error, info, warn};

use crate::SessionManager;

/// Timing knobs for the idle scan. Production uses the defaults; tests
/// shrink the cycle.
#[derive(Debug, Clone, Copy)]
pub struct IdleMonitorConfig {
    pub cycle: Duration,
    pub idle_after: Duration,
    pub error_backoff: Duration,
}

impl Default for IdleMonitorConfig {
    fn default() -> Self {
        Self {
            cycle: Duration::from_secs(120),
            idle_after: Duration::from_secs(600),
            error_backoff: Duration::from_secs(60),
        }
    }
}

/// The process-wide background task that concludes idle sessions. Started
/// once at boot, stopped with a bounded wait on shutdown.
pub struct IdleMonitor {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl IdleMonitor {
    pub fn start(manager: Arc<SessionManager>, config: IdleMonitorConfig) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(
                cycle_secs = config.cycle.as_secs(),
                idle_after_secs = config.idle_after.as_secs(),
                "idle session monitor started"
            );

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    () = sleep(config.cycle) => {
                        match run_cycle(&manager, config.idle_after).await {
                            Ok(0) => {}
                            Ok(concluded) => {
                                info!(concluded, "idle cycle concluded sessions");
                            }
                            Err(err) => {
                                error!(error = %err, "idle cycle failed, backing off");
                                tokio::select! {
                                    _ = stop_rx.changed() => break,
                                    () = sleep(config.error_backoff) => {}
                                }
                            }
                        }
                    }
                }
            }

            info!("idle session monitor stopped");
        });

        Self { handle, stop }
    }

    /// Signal the task and wait for it to wind down, bounded.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .is_err()
        {
            warn!("idle monitor did not stop within the shutdown window");
        }
    }
}

/// One scan: find sessions with enough history that have gone quiet and
/// conclude each. A single session's failure leaves the rest of the batch
/// alone; the next cycle retries it.
async fn run_cycle(manager: &SessionManager, idle_after: Duration) -> Result<usize, AppError> {
    let threshold = chrono::Duration::from_std(idle_after)
        .unwrap_or_else(|_| chrono::Duration::minutes(10));
    let cutoff = Utc::now() - threshold;

    let idle_sessions = ChatSession::find_idle(cutoff, manager.db()).await?;
    if idle_sessions.is_empty() {
        return Ok(0);
    }

    info!(candidates = idle_sessions.len(), "found idle sessions");

    let mut concluded = 0usize;
    for session in idle_sessions {
        match manager.conclude_session(&session.id, "idle").await {
            Ok(true) => concluded = concluded.saturating_add(1),
            Ok(false) => {}
            Err(err) => {
                error!(session_id = %session.id, error = %err, "failed to conclude idle session");
            }
        }
    }

    Ok(concluded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use common::{
        storage::{
            db::SurrealDbClient,
            types::{
                chat_message::{ChatMessage, MessageRole},
                chat_session::SessionStatus,
            },
        },
        utils::llm::{testing::CannedChat, ChatCompleter},
    };
    use uuid::Uuid;

    async fn setup() -> (Arc<SessionManager>, Arc<SurrealDbClient>) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("initialize schema");

        let chat = Arc::new(CannedChat::replying("Idle topic recap")) as Arc<dyn ChatCompleter>;
        (Arc::new(SessionManager::new(Arc::clone(&db), chat)), db)
    }

    async fn seed_session(
        db: &SurrealDbClient,
        idle_minutes: i64,
        message_count: u32,
    ) -> String {
        let mut session = ChatSession::new("New Chat".to_string());
        session.message_count = message_count;
        session.last_message_at = Some(Utc::now() - ChronoDuration::minutes(idle_minutes));
        let session_id = session.id.clone();
        db.insert(session).await.expect("store session");

        for order in 0..message_count {
            let role = if order % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            let message = ChatMessage::new(
                session_id.clone(),
                role,
                format!("message {order}"),
                order,
                Vec::new(),
                None,
            );
            db.insert(message).await.expect("store message");
        }

        session_id
    }

    #[tokio::test]
    async fn test_idle_session_is_concluded_within_a_cycle() {
        let (manager, db) = setup().await;
        let session_id = seed_session(&db, 11, 2).await;

        let monitor = IdleMonitor::start(
            Arc::clone(&manager),
            IdleMonitorConfig {
                cycle: Duration::from_millis(50),
                idle_after: Duration::from_secs(600),
                error_backoff: Duration::from_millis(50),
            },
        );

        // Give the monitor a few cycles.
        sleep(Duration::from_millis(400)).await;
        monitor.stop().await;

        let session = ChatSession::get_required(&session_id, &db)
            .await
            .expect("fetch");
        assert_eq!(session.status, SessionStatus::Concluded);
        assert!(session.summary.is_some());
        assert!(!session.title.is_empty());
        assert!(session.title.split_whitespace().count() <= 8);
    }

    #[tokio::test]
    async fn test_fresh_and_short_sessions_survive_the_scan() {
        let (manager, db) = setup().await;
        let fresh_id = seed_session(&db, 1, 4).await;
        let short_id = seed_session(&db, 30, 1).await;

        let concluded = run_cycle(&manager, Duration::from_secs(600))
            .await
            .expect("cycle");
        assert_eq!(concluded, 0);

        for session_id in [&fresh_id, &short_id] {
            let session = ChatSession::get_required(session_id, &db)
                .await
                .expect("fetch");
            assert_eq!(session.status, SessionStatus::Active);
        }
    }

    #[tokio::test]
    async fn test_run_cycle_concludes_multiple_idle_sessions() {
        let (manager, db) = setup().await;
        let first = seed_session(&db, 15, 2).await;
        let second = seed_session(&db, 20, 4).await;

        let concluded = run_cycle(&manager, Duration::from_secs(600))
            .await
            .expect("cycle");
        assert_eq!(concluded, 2);

        for session_id in [&first, &second] {
            let session = ChatSession::get_required(session_id, &db)
                .await
                .expect("fetch");
            assert_eq!(session.status, SessionStatus::Concluded);
        }
    }

    #[tokio::test]
    async fn test_stop_terminates_the_task() {
        let (manager, _db) = setup().await;

        let monitor = IdleMonitor::start(Arc::clone(&manager), IdleMonitorConfig::default());
        // Returns promptly even though the cycle is two minutes long.
        monitor.stop().await;
    }
}
