use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use log::{ debug, error, warn };
use redis::{ Client, AsyncCommands, Script };
use serde::{ Serialize, Deserialize };
use uuid::Uuid;
use crate::history::{ next_timestamp, sort_newest_first, HistoryError, HistoryResult, HistoryStore };
use crate::models::chat::{ Message, Role, Session };

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    id: String,
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
}

impl StoredMessage {
    fn into_message(self, session_id: &str) -> Message {
        Message {
            id: self.id,
            session_id: session_id.to_string(),
            role: self.role,
            content: self.content,
            timestamp: self.timestamp,
        }
    }
}

// Both scripts write only if the session field still exists and the value
// read beforehand is unchanged. ARGV[1] is the session id, ARGV[2] the value
// read (empty for none), ARGV[3] the new value.
const RENAME_SCRIPT: &str = r"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if not current then return 0 end
if current ~= ARGV[2] then return -1 end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
return 1
";

const APPEND_SCRIPT: &str = r"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then return 0 end
local last = redis.call('LINDEX', KEYS[2], -1) or ''
if last ~= ARGV[2] then return -1 end
redis.call('RPUSH', KEYS[2], ARGV[3])
return 1
";

const MAX_WRITE_ATTEMPTS: usize = 8;

#[derive(Debug, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    Missing,
    Stale,
}

impl From<i64> for WriteOutcome {
    fn from(code: i64) -> Self {
        match code {
            1 => WriteOutcome::Written,
            0 => WriteOutcome::Missing,
            _ => WriteOutcome::Stale,
        }
    }
}

/// Sessions live in one hash (`{prefix}sessions`, field = session id), each
/// session's messages in a list (`{prefix}messages:{id}`) appended with RPUSH.
pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
    rename_script: Script,
    append_script: Script,
}

impl RedisHistoryStore {
    pub fn new(url: &str, key_prefix: &str) -> HistoryResult<Self> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix: key_prefix.to_string(),
            rename_script: Script::new(RENAME_SCRIPT),
            append_script: Script::new(APPEND_SCRIPT),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn sessions_key(&self) -> String {
        format!("{}sessions", self.key_prefix)
    }

    fn messages_key(&self, session_id: &str) -> String {
        format!("{}messages:{}", self.key_prefix, session_id)
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn create_session(&self, id: &str, name: &str) -> HistoryResult<Session> {
        let mut conn = self.get_connection().await?;
        let session = Session {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&session)?;
        let created: bool = conn.hset_nx(self.sessions_key(), id, &json).await?;
        if !created {
            return Err(HistoryError::AlreadyExists(id.to_string()));
        }
        debug!("Created session {} in redis", id);
        Ok(session)
    }

    async fn list_sessions(&self) -> HistoryResult<Vec<Session>> {
        let mut conn = self.get_connection().await?;
        let entries: Vec<String> = conn.hvals(self.sessions_key()).await?;
        let mut sessions = Vec::with_capacity(entries.len());

        for entry in &entries {
            match serde_json::from_str::<Session>(entry) {
                Ok(session) => sessions.push(session),
                Err(e) => error!("Error parsing session entry: {}", e),
            }
        }
        sort_newest_first(&mut sessions);
        Ok(sessions)
    }

    async fn get_session(&self, id: &str) -> HistoryResult<Option<Session>> {
        let mut conn = self.get_connection().await?;
        let entry: Option<String> = conn.hget(self.sessions_key(), id).await?;
        match entry {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn rename_session(&self, id: &str, name: &str) -> HistoryResult<Session> {
        let mut conn = self.get_connection().await?;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let entry: Option<String> = conn.hget(self.sessions_key(), id).await?;
            let Some(current) = entry else {
                return Err(HistoryError::NotFound(id.to_string()));
            };
            let mut session: Session = serde_json::from_str(&current)?;
            session.name = name.to_string();
            let json = serde_json::to_string(&session)?;

            let code: i64 = self.rename_script
                .key(self.sessions_key())
                .arg(id)
                .arg(&current)
                .arg(&json)
                .invoke_async(&mut conn).await?;
            match WriteOutcome::from(code) {
                WriteOutcome::Written => {
                    return Ok(session);
                }
                WriteOutcome::Missing => {
                    return Err(HistoryError::NotFound(id.to_string()));
                }
                WriteOutcome::Stale => debug!("Session {} changed during rename, retrying", id),
            }
        }
        warn!("Gave up renaming session {} after {} attempts", id, MAX_WRITE_ATTEMPTS);
        Err(HistoryError::Backend(format!("concurrent updates to session {}", id)))
    }

    async fn delete_session(&self, id: &str) -> HistoryResult<()> {
        let mut conn = self.get_connection().await?;
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .hdel(self.sessions_key(), id)
            .del(self.messages_key(id))
            .query_async(&mut conn).await?;
        if removed == 0 {
            return Err(HistoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str
    ) -> HistoryResult<Message> {
        let mut conn = self.get_connection().await?;
        let key = self.messages_key(session_id);

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let last: Option<String> = conn.lindex(&key, -1).await?;
            let last_timestamp = match &last {
                Some(json) => Some(serde_json::from_str::<StoredMessage>(json)?.timestamp),
                None => None,
            };

            let stored = StoredMessage {
                id: Uuid::new_v4().to_string(),
                role,
                content: content.to_string(),
                timestamp: next_timestamp(last_timestamp, Utc::now()),
            };
            let json_msg = serde_json::to_string(&stored)?;

            let code: i64 = self.append_script
                .key(self.sessions_key())
                .key(&key)
                .arg(session_id)
                .arg(last.as_deref().unwrap_or(""))
                .arg(&json_msg)
                .invoke_async(&mut conn).await?;
            match WriteOutcome::from(code) {
                WriteOutcome::Written => {
                    return Ok(stored.into_message(session_id));
                }
                WriteOutcome::Missing => {
                    return Err(HistoryError::NotFound(session_id.to_string()));
                }
                WriteOutcome::Stale => {
                    debug!("Session {} gained a message during append, retrying", session_id)
                }
            }
        }
        warn!("Gave up appending to session {} after {} attempts", session_id, MAX_WRITE_ATTEMPTS);
        Err(HistoryError::Backend(format!("concurrent appends to session {}", session_id)))
    }

    async fn get_messages(&self, session_id: &str) -> HistoryResult<Vec<Message>> {
        let mut conn = self.get_connection().await?;
        let json_entries: Vec<String> = conn.lrange(self.messages_key(session_id), 0, -1).await?;
        let mut messages = Vec::with_capacity(json_entries.len());

        for json_entry in &json_entries {
            match serde_json::from_str::<StoredMessage>(json_entry) {
                Ok(msg) => messages.push(msg.into_message(session_id)),
                Err(e) => error!("Error parsing history entry: {}", e),
            }
        }
        Ok(messages)
    }
}
