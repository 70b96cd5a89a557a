pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use std::sync::Arc;
use thiserror::Error;
use super::{ LlmConfig, LlmType };
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM configuration error: {0}")]
    Config(String),
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM returned no content: {0}")]
    EmptyResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: PromptRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: PromptRole::User, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, LlmError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_requires_api_key() {
        let config = LlmConfig { llm_type: LlmType::OpenAI, ..Default::default() };
        assert!(matches!(new_client(&config), Err(LlmError::Config(_))));
    }

    #[test]
    fn test_new_client_applies_model_defaults() {
        let config = LlmConfig {
            llm_type: LlmType::OpenAI,
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        assert_eq!(new_client(&config).unwrap().get_model(), "gpt-4");

        let config = LlmConfig { llm_type: LlmType::Ollama, ..Default::default() };
        let client = new_client(&config).unwrap();
        assert_eq!(client.get_model(), "llama3");
        assert_eq!(client.get_base_url().as_deref(), Some("http://localhost:11434"));
    }

    #[test]
    fn test_prompt_message_serializes_lowercase_role() {
        let json = serde_json::to_value(PromptMessage::system("be nice")).unwrap();
        assert_eq!(json["role"], "system");
    }
}
