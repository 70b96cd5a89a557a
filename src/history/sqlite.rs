use async_trait::async_trait;
use chrono::{ DateTime, SecondsFormat, Utc };
use log::info;
use rusqlite::{ params, Connection, ErrorCode, OptionalExtension };
use std::path::Path;
use std::sync::{ Arc, Mutex };
use uuid::Uuid;
use crate::history::{ next_timestamp, HistoryError, HistoryResult, HistoryStore };
use crate::models::chat::{ Message, Role, Session };

const SCHEMA: &str =
    "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, timestamp, seq);
";

/// Relational store on a single SQLite file. Deleting a session cascades to
/// its messages through the foreign key.
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

// Fixed-width UTC text keeps lexical order equal to chronological order.
fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(text: &str) -> HistoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| HistoryError::Backend(format!("bad timestamp '{}': {}", text, e)))
}

/// Current time truncated to what the database keeps.
fn stored_now() -> HistoryResult<DateTime<Utc>> {
    decode_time(&encode_time(&Utc::now()))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn read_session(conn: &Connection, id: &str) -> HistoryResult<Option<Session>> {
    let row = conn
        .query_row(
            "SELECT id, name, created_at FROM sessions WHERE id = ?1",
            params![id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        )
        .optional()?;
    match row {
        Some((id, name, created_at)) =>
            Ok(Some(Session { id, name, created_at: decode_time(&created_at)? })),
        None => Ok(None),
    }
}

impl SqliteHistoryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> HistoryResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| HistoryError::Backend(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened sqlite history database at {}", path.display());
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> HistoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<F, T>(&self, f: F) -> HistoryResult<T>
        where F: FnOnce(&mut Connection) -> HistoryResult<T> + Send + 'static, T: Send + 'static
    {
        let conn = Arc::clone(&self.conn);
        tokio::task
            ::spawn_blocking(move || {
                let mut guard = conn
                    .lock()
                    .map_err(|_| HistoryError::Backend("sqlite connection poisoned".into()))?;
                f(&mut guard)
            }).await
            .map_err(|e| HistoryError::Backend(format!("sqlite task failed: {}", e)))?
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn create_session(&self, id: &str, name: &str) -> HistoryResult<Session> {
        let session = Session {
            id: id.to_string(),
            name: name.to_string(),
            created_at: stored_now()?,
        };
        let row = session.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![row.id, row.name, encode_time(&row.created_at)]
            ).map_err(|e| {
                if is_constraint_violation(&e) {
                    HistoryError::AlreadyExists(row.id.clone())
                } else {
                    e.into()
                }
            })?;
            Ok(())
        }).await?;
        Ok(session)
    }

    async fn list_sessions(&self) -> HistoryResult<Vec<Session>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, created_at FROM sessions ORDER BY created_at DESC, id ASC"
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, name, created_at)| {
                    Ok(Session { id, name, created_at: decode_time(&created_at)? })
                })
                .collect()
        }).await
    }

    async fn get_session(&self, id: &str) -> HistoryResult<Option<Session>> {
        let id = id.to_string();
        self.with_conn(move |conn| read_session(conn, &id)).await
    }

    async fn rename_session(&self, id: &str, name: &str) -> HistoryResult<Session> {
        let (id, name) = (id.to_string(), name.to_string());
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET name = ?1 WHERE id = ?2",
                params![name, id]
            )?;
            if changed == 0 {
                return Err(HistoryError::NotFound(id));
            }
            read_session(conn, &id)?.ok_or(HistoryError::NotFound(id))
        }).await
    }

    async fn delete_session(&self, id: &str) -> HistoryResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Err(HistoryError::NotFound(id));
            }
            Ok(())
        }).await
    }

    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str
    ) -> HistoryResult<Message> {
        let (session_id, content) = (session_id.to_string(), content.to_string());
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let exists = tx
                .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![session_id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Err(HistoryError::NotFound(session_id));
            }
            let last: Option<String> = tx
                .query_row(
                    "SELECT timestamp FROM messages WHERE session_id = ?1 ORDER BY timestamp DESC, seq DESC LIMIT 1",
                    params![session_id],
                    |row| row.get(0)
                )
                .optional()?;
            let last = match last {
                Some(text) => Some(decode_time(&text)?),
                None => None,
            };

            let message = Message {
                id: Uuid::new_v4().to_string(),
                session_id,
                role,
                content,
                timestamp: next_timestamp(last, stored_now()?),
            };
            tx.execute(
                "INSERT INTO messages (id, session_id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    message.session_id,
                    message.role.as_str(),
                    message.content,
                    encode_time(&message.timestamp)
                ]
            )?;
            tx.commit()?;
            Ok(message)
        }).await
    }

    async fn get_messages(&self, session_id: &str) -> HistoryResult<Vec<Message>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, role, content, timestamp FROM messages
                 WHERE session_id = ?1 ORDER BY timestamp ASC, seq ASC"
            )?;
            let rows = stmt
                .query_map(params![session_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(id, role, content, timestamp)| {
                    Ok(Message {
                        id,
                        session_id: session_id.clone(),
                        role: role.parse().map_err(HistoryError::Backend)?,
                        content,
                        timestamp: decode_time(&timestamp)?,
                    })
                })
                .collect()
        }).await
    }
}
