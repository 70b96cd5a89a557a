use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::history::{ next_timestamp, sort_newest_first, HistoryError, HistoryResult, HistoryStore };
use crate::models::chat::{ Message, Role, Session };

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    messages: HashMap<String, Vec<Message>>,
}

/// Process-local store. Everything is lost on restart.
#[derive(Default)]
pub struct MemoryHistoryStore {
    inner: RwLock<Inner>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn create_session(&self, id: &str, name: &str) -> HistoryResult<Session> {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(id) {
            return Err(HistoryError::AlreadyExists(id.to_string()));
        }
        let session = Session {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        inner.sessions.insert(id.to_string(), session.clone());
        Ok(session)
    }

    async fn list_sessions(&self) -> HistoryResult<Vec<Session>> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sort_newest_first(&mut sessions);
        Ok(sessions)
    }

    async fn get_session(&self, id: &str) -> HistoryResult<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(id).cloned())
    }

    async fn rename_session(&self, id: &str, name: &str) -> HistoryResult<Session> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions
            .get_mut(id)
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))?;
        session.name = name.to_string();
        Ok(session.clone())
    }

    async fn delete_session(&self, id: &str) -> HistoryResult<()> {
        let mut inner = self.inner.write().await;
        if inner.sessions.remove(id).is_none() {
            return Err(HistoryError::NotFound(id.to_string()));
        }
        inner.messages.remove(id);
        Ok(())
    }

    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str
    ) -> HistoryResult<Message> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(session_id) {
            return Err(HistoryError::NotFound(session_id.to_string()));
        }
        let thread = inner.messages.entry(session_id.to_string()).or_default();
        let message = Message {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: next_timestamp(thread.last().map(|m| m.timestamp), Utc::now()),
        };
        thread.push(message.clone());
        Ok(message)
    }

    async fn get_messages(&self, session_id: &str) -> HistoryResult<Vec<Message>> {
        Ok(self.inner.read().await.messages.get(session_id).cloned().unwrap_or_default())
    }
}
