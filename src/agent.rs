use crate::cli::Args;
use crate::config::prompt::{ self, get_system_prompt, PromptConfig };
use crate::history::{ HistoryError, HistoryStore };
use crate::llm::LlmConfig;
use crate::llm::chat::{ ChatClient, CompletionRequest, PromptMessage, new_client as new_chat_client };
use crate::memory::{ SessionMemories, Summarizer };
use crate::models::chat::Role;

use log::{ info, warn, error, debug };
use std::error::Error;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub chat_temperature: f32,
    pub summary_temperature: f32,
    pub memory_window: usize,
    pub default_session_name: String,
    pub prompts_path: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            chat_temperature: 0.7,
            summary_temperature: 0.0,
            memory_window: 10,
            default_session_name: "New Chat".to_string(),
            prompts_path: None,
        }
    }
}

impl From<&Args> for AgentSettings {
    fn from(args: &Args) -> Self {
        Self {
            chat_temperature: args.chat_temperature,
            summary_temperature: args.summary_temperature,
            memory_window: args.memory_window,
            default_session_name: args.default_session_name.clone(),
            prompts_path: args.prompts_path.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}

/// Answers chat messages using per-session memory and records every turn in
/// the history store.
pub struct ChatAgent {
    chat_client: Arc<dyn ChatClient>,
    summarizer: Summarizer,
    history_store: Arc<dyn HistoryStore>,
    memories: SessionMemories,
    prompt_config: RwLock<Arc<PromptConfig>>,
    settings: AgentSettings,
}

impl ChatAgent {
    fn initialize_llm_clients(
        args: &Args
    ) -> Result<(Arc<dyn ChatClient>, Arc<dyn ChatClient>), Box<dyn Error + Send + Sync>> {
        let chat_api_key = if !args.chat_api_key.is_empty() {
            Some(args.chat_api_key.clone())
        } else {
            None
        };
        let chat_config = LlmConfig {
            llm_type: args.chat_llm_type.parse()?,
            base_url: args.chat_base_url.clone(),
            api_key: chat_api_key,
            completion_model: args.chat_model.clone(),
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={}, BaseURL={:?}",
            chat_config.llm_type,
            chat_client.get_model(),
            chat_client.get_base_url()
        );

        let summary_config = LlmConfig {
            completion_model: args.summary_model.clone().or_else(|| args.chat_model.clone()),
            ..chat_config
        };
        let summary_client = new_chat_client(&summary_config)?;
        info!("Summary client configured: Model={}", summary_client.get_model());

        Ok((chat_client, summary_client))
    }

    pub fn new(
        args: &Args,
        history_store: Arc<dyn HistoryStore>
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let (chat_client, summary_client) = Self::initialize_llm_clients(args)?;
        Ok(Self::from_parts(chat_client, summary_client, history_store, AgentSettings::from(args))?)
    }

    pub fn from_parts(
        chat_client: Arc<dyn ChatClient>,
        summary_client: Arc<dyn ChatClient>,
        history_store: Arc<dyn HistoryStore>,
        settings: AgentSettings
    ) -> Result<Self, prompt::PromptError> {
        let prompt_config = match &settings.prompts_path {
            Some(path) => prompt::load_prompts(path)?,
            None => Arc::new(PromptConfig::default()),
        };
        Ok(Self {
            chat_client,
            summarizer: Summarizer::new(summary_client, settings.summary_temperature),
            history_store,
            memories: SessionMemories::new(settings.memory_window),
            prompt_config: RwLock::new(prompt_config),
            settings,
        })
    }

    pub fn history_store(&self) -> &Arc<dyn HistoryStore> {
        &self.history_store
    }

    async fn current_prompts(&self) -> Arc<PromptConfig> {
        let current = Arc::clone(&*self.prompt_config.read().await);
        let Some(path) = &self.settings.prompts_path else {
            return current;
        };
        match prompt::reload_prompts_if_changed(path, &current) {
            Ok(Some(new_config)) => {
                *self.prompt_config.write().await = Arc::clone(&new_config);
                new_config
            }
            Ok(None) => current,
            Err(e) => {
                warn!("Failed to reload prompts from {}: {}", path, e);
                current
            }
        }
    }

    async fn ensure_session(&self, session_id: &str) -> Result<(), HistoryError> {
        if self.history_store.get_session(session_id).await?.is_some() {
            return Ok(());
        }
        match
            self.history_store.create_session(session_id, &self.settings.default_session_name).await
        {
            Ok(_) => {
                info!("Created session {} for incoming chat", session_id);
                Ok(())
            }
            // created concurrently by the history API
            Err(HistoryError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn get_response(
        &self,
        input: &str,
        session_id: &str
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let prompts = self.current_prompts().await;
        // held for the whole turn so turns of one session never interleave
        let mut memory = loop {
            let memory = self.memories.get_or_create(session_id).await;
            let guard = Arc::clone(&memory).lock_owned().await;
            if self.memories.is_registered(session_id, &memory).await {
                break guard;
            }
            debug!("Memory for session {} was dropped while waiting, retrying", session_id);
        };

        self.ensure_session(session_id).await?;
        if !memory.is_seeded() {
            let persisted = self.history_store.get_messages(session_id).await?;
            if !persisted.is_empty() {
                info!(
                    "Seeding memory for session {} from {} stored messages",
                    session_id,
                    persisted.len()
                );
            }
            memory.seed_from_history(&persisted);
        }

        let vars = memory.load_variables();
        let system_prompt = get_system_prompt(&prompts, &vars.chat_history, &vars.summary)?;
        let request = CompletionRequest {
            messages: vec![PromptMessage::system(system_prompt), PromptMessage::user(input)],
            temperature: self.settings.chat_temperature,
        };
        debug!("Sending turn for session {} to {}", session_id, self.chat_client.get_model());
        let reply = self.chat_client
            .complete(&request).await
            .map_err(|e| {
                error!("LLM interaction error: {}", e);
                e
            })?.response;

        self.history_store.add_message(session_id, Role::User, input).await?;
        self.history_store.add_message(session_id, Role::Bot, &reply).await?;

        let new_lines = memory.save_context(input, &reply);
        let current_summary = memory.summary().to_string();
        match self.summarizer.summarize(&prompts, &current_summary, &new_lines).await {
            Ok(summary) => memory.set_summary(summary),
            Err(e) => warn!("Summary update for session {} failed: {}", session_id, e),
        }

        Ok(reply)
    }

    /// Drops the in-process memory of a session.
    pub async fn forget(&self, session_id: &str) -> bool {
        self.memories.remove(session_id).await
    }

    pub async fn active_memories(&self) -> usize {
        self.memories.len().await
    }
}
