//! Per-session conversation memory: a window of recent turns plus a running
//! summary that the summary model keeps up to date.

mod summary;

pub use self::summary::Summarizer;

use log::debug;
use std::collections::{ HashMap, VecDeque };
use std::sync::Arc;
use tokio::sync::{ Mutex, RwLock };
use crate::models::chat::{ Message, Role };

#[derive(Clone, Debug, PartialEq)]
pub struct Turn {
    pub input: String,
    pub output: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryVariables {
    pub chat_history: String,
    pub summary: String,
}

fn render_turn(turn: &Turn) -> String {
    format!("Human: {}\nAI: {}", turn.input, turn.output)
}

#[derive(Debug)]
pub struct ConversationMemory {
    buffer: VecDeque<Turn>,
    summary: String,
    /// Number of turns kept verbatim; 0 keeps all of them.
    window: usize,
    seeded: bool,
}

impl ConversationMemory {
    pub fn new(window: usize) -> Self {
        Self { buffer: VecDeque::new(), summary: String::new(), window, seeded: false }
    }

    pub fn load_variables(&self) -> MemoryVariables {
        MemoryVariables {
            chat_history: self.buffer.iter().map(render_turn).collect::<Vec<_>>().join("\n"),
            summary: self.summary.clone(),
        }
    }

    /// Records a finished turn and returns it rendered as new summary lines.
    pub fn save_context(&mut self, input: &str, output: &str) -> String {
        let turn = Turn { input: input.to_string(), output: output.to_string() };
        let new_lines = render_turn(&turn);
        self.buffer.push_back(turn);
        if self.window > 0 {
            while self.buffer.len() > self.window {
                self.buffer.pop_front();
            }
        }
        new_lines
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = summary.into();
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.buffer.iter()
    }

    /// Whether stored history has been loaded into this memory yet.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Rebuilds the turn buffer from persisted messages. A user message
    /// followed by a bot message forms one turn; anything unpaired is skipped.
    pub fn seed_from_history(&mut self, messages: &[Message]) {
        self.seeded = true;
        let mut pending: Option<&str> = None;
        for message in messages {
            match message.role {
                Role::User => {
                    pending = Some(&message.content);
                }
                Role::Bot => {
                    if let Some(input) = pending.take() {
                        self.save_context(input, &message.content);
                    }
                }
            }
        }
    }
}

/// Process-wide map from session id to that session's memory. Entries stay
/// until the session is deleted, so memory grows with the number of distinct
/// session ids seen since startup.
pub struct SessionMemories {
    window: usize,
    memories: RwLock<HashMap<String, Arc<Mutex<ConversationMemory>>>>,
}

impl SessionMemories {
    pub fn new(window: usize) -> Self {
        Self { window, memories: RwLock::new(HashMap::new()) }
    }

    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<ConversationMemory>> {
        if let Some(memory) = self.memories.read().await.get(session_id) {
            return Arc::clone(memory);
        }

        let mut memories = self.memories.write().await;
        // another request may have won the race between the two locks
        if let Some(memory) = memories.get(session_id) {
            return Arc::clone(memory);
        }
        debug!("Creating conversation memory for session {}", session_id);
        let memory = Arc::new(Mutex::new(ConversationMemory::new(self.window)));
        memories.insert(session_id.to_string(), Arc::clone(&memory));
        memory
    }

    /// True while `memory` is still the one registered for `session_id`.
    pub async fn is_registered(&self, session_id: &str, memory: &Arc<Mutex<ConversationMemory>>) -> bool {
        self.memories
            .read().await
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, memory))
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.memories.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.memories.read().await.len()
    }
}
