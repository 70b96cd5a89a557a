use log::debug;
use std::error::Error;
use std::sync::Arc;
use crate::config::prompt::{ get_summary_prompt, PromptConfig };
use crate::llm::chat::{ ChatClient, CompletionRequest, PromptMessage };

/// Folds new conversation lines into a running summary using the summary model.
#[derive(Clone)]
pub struct Summarizer {
    client: Arc<dyn ChatClient>,
    temperature: f32,
}

impl Summarizer {
    pub fn new(client: Arc<dyn ChatClient>, temperature: f32) -> Self {
        Self { client, temperature }
    }

    pub async fn summarize(
        &self,
        prompts: &PromptConfig,
        current_summary: &str,
        new_lines: &str
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let prompt = get_summary_prompt(prompts, current_summary, new_lines)?;
        let request = CompletionRequest {
            messages: vec![PromptMessage::user(prompt)],
            temperature: self.temperature,
        };
        let resp = self.client.complete(&request).await?;
        debug!("Summary updated ({} chars) by {}", resp.response.len(), self.client.get_model());
        Ok(resp.response.trim().to_string())
    }
}
