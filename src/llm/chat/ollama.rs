use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use async_trait::async_trait;
use super::{ ChatClient, CompletionRequest, CompletionResponse, LlmError, PromptMessage };
use crate::llm::LlmConfig;

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>) -> Self {
        let model = completion_model.unwrap_or_else(|| "llama3".to_string());
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".into());

        Self {
            http: HttpClient::new(),
            base_url: url,
            completion_model: model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if config.llm_type != crate::llm::LlmType::Ollama {
            return Err(LlmError::Config("Invalid config type for OllamaClient".into()));
        }

        Ok(Self::new(config.base_url.clone(), config.completion_model.clone()))
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let req = ChatRequest {
            model: &self.completion_model,
            messages: &request.messages,
            stream: false,
            options: ChatOptions { temperature: request.temperature },
        };
        let resp = self.http.post(&url).json(&req).send().await?.error_for_status()?;
        let data = resp.json::<ChatResponse>().await?;
        let content = data.message
            .map(|m| m.content)
            .ok_or_else(|| LlmError::EmptyResponse("Ollama response had no message".into()))?;
        Ok(CompletionResponse { response: content })
    }

    fn get_model(&self) -> String {
        self.completion_model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
