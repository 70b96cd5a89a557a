mod memory;
mod redis;
mod sqlite;

pub use self::memory::MemoryHistoryStore;
pub use self::redis::RedisHistoryStore;
pub use self::sqlite::SqliteHistoryStore;

use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use log::info;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ Message, Role, Session };

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("session '{0}' not found")]
    NotFound(String),
    #[error("session '{0}' already exists")]
    AlreadyExists(String),
    #[error("history backend error: {0}")]
    Backend(String),
    #[error("history serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<::redis::RedisError> for HistoryError {
    fn from(err: ::redis::RedisError) -> Self {
        HistoryError::Backend(err.to_string())
    }
}

impl From<rusqlite::Error> for HistoryError {
    fn from(err: rusqlite::Error) -> Self {
        HistoryError::Backend(err.to_string())
    }
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Persistent storage for sessions and their messages.
///
/// Implementations keep session ids unique, return messages in ascending
/// timestamp order and delete a session's messages together with the session.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn create_session(&self, id: &str, name: &str) -> HistoryResult<Session>;

    /// Lists every session, newest first.
    async fn list_sessions(&self) -> HistoryResult<Vec<Session>>;

    async fn get_session(&self, id: &str) -> HistoryResult<Option<Session>>;

    async fn rename_session(&self, id: &str, name: &str) -> HistoryResult<Session>;

    async fn delete_session(&self, id: &str) -> HistoryResult<()>;

    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str
    ) -> HistoryResult<Message>;

    /// Messages of a session in ascending timestamp order. Unknown sessions yield an empty list.
    async fn get_messages(&self, session_id: &str) -> HistoryResult<Vec<Message>>;
}

/// Timestamp for a message appended after `last`, never earlier than it.
pub fn next_timestamp(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match last {
        Some(last) if last > now => last,
        _ => now,
    }
}

pub fn sort_newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

pub fn create_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryHistoryStore::new())),
        "redis" => {
            let store = RedisHistoryStore::new(&args.history_host, &args.history_redis_prefix)?;
            Ok(Arc::new(store))
        }
        "sqlite" => {
            let store = SqliteHistoryStore::open(&args.history_sqlite_path)?;
            Ok(Arc::new(store))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "redis" => info!("Chat history will be stored in: redis at {}", args.history_host),
        "sqlite" => info!("Chat history will be stored in: sqlite at {}", args.history_sqlite_path),
        other => info!("Chat history will be stored in: {}", other),
    }
    create_history_store(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_next_timestamp_never_goes_backwards() {
        let now = Utc::now();
        let later = now + Duration::seconds(5);
        assert_eq!(next_timestamp(Some(later), now), later);
        assert_eq!(next_timestamp(Some(now), later), later);
        assert_eq!(next_timestamp(None, now), now);
    }

    #[test]
    fn test_sort_newest_first() {
        let now = Utc::now();
        let mut sessions = vec![
            Session { id: "old".into(), name: "a".into(), created_at: now - Duration::hours(1) },
            Session { id: "new".into(), name: "b".into(), created_at: now },
        ];
        sort_newest_first(&mut sessions);
        assert_eq!(sessions[0].id, "new");
    }
}

/// Behaviour every `HistoryStore` backend must share.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;

    pub async fn session_lifecycle(store: &dyn HistoryStore) {
        let first = store.create_session("s1", "Chat 1").await.unwrap();
        assert_eq!(first.name, "Chat 1");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create_session("s2", "Chat 2").await.unwrap();

        let err = store.create_session("s1", "again").await.unwrap_err();
        assert!(matches!(err, HistoryError::AlreadyExists(id) if id == "s1"));

        let listed = store.list_sessions().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);

        let renamed = store.rename_session("s1", "Renamed").await.unwrap();
        assert_eq!(renamed.name, "Renamed");
        assert_eq!(renamed.created_at, first.created_at);
        let fetched = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "Renamed");
    }

    pub async fn delete_cascades_messages(store: &dyn HistoryStore) {
        store.create_session("doomed", "Doomed").await.unwrap();
        store.create_session("kept", "Kept").await.unwrap();
        store.add_message("doomed", Role::User, "hello").await.unwrap();
        store.add_message("doomed", Role::Bot, "hi").await.unwrap();
        store.add_message("kept", Role::User, "stay").await.unwrap();

        store.delete_session("doomed").await.unwrap();

        assert!(store.get_session("doomed").await.unwrap().is_none());
        assert!(store.get_messages("doomed").await.unwrap().is_empty());
        assert_eq!(store.get_messages("kept").await.unwrap().len(), 1);
        let ids: Vec<String> = store.list_sessions().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["kept".to_string()]);
    }

    pub async fn messages_are_ordered(store: &dyn HistoryStore) {
        store.create_session("ordered", "Ordered").await.unwrap();
        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Bot };
            store.add_message("ordered", role, &format!("msg {}", i)).await.unwrap();
        }
        let messages = store.get_messages("ordered").await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
        assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(messages.iter().all(|m| m.session_id == "ordered"));
        assert_eq!(messages[1].role, Role::Bot);
    }

    pub async fn missing_session_errors(store: &dyn HistoryStore) {
        assert!(matches!(
            store.rename_session("ghost", "x").await,
            Err(HistoryError::NotFound(_))
        ));
        assert!(matches!(store.delete_session("ghost").await, Err(HistoryError::NotFound(_))));
        assert!(matches!(
            store.add_message("ghost", Role::User, "hi").await,
            Err(HistoryError::NotFound(_))
        ));
        assert!(store.get_messages("ghost").await.unwrap().is_empty());
        assert!(store.get_session("ghost").await.unwrap().is_none());
    }
}
