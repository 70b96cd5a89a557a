use async_trait::async_trait;
use log::debug;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

use super::{ ChatClient, CompletionRequest, CompletionResponse, LlmError, PromptMessage };
use crate::llm::LlmConfig;

const DEFAULT_MODEL: &str = "gpt-4";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, LlmError> {
        let chat_model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                LlmError::Config(format!("Invalid API key format: {}", e))
            )?
        );

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            model: chat_model,
            base_url: api_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::Config("OpenAI API key is required".to_string()))?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let req = OpenAIChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
        };
        debug!("OpenAI request: model={}, messages={}", self.model, request.messages.len());

        let resp = self.http
            .post(self.endpoint())
            .json(&req)
            .send().await?
            .error_for_status()?
            .json::<OpenAIResponse>().await?;

        let content = resp.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::EmptyResponse("No response from OpenAI API".to_string()))?;

        Ok(CompletionResponse { response: content })
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{ body_partial_json, header, method, path };
    use wiremock::{ Mock, MockServer, ResponseTemplate };

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![PromptMessage::system("sys"), PromptMessage::user("hello")],
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn test_complete_posts_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(
                body_partial_json(
                    json!({
                    "model": "gpt-4",
                    "messages": [
                        { "role": "system", "content": "sys" },
                        { "role": "user", "content": "hello" }
                    ]
                })
                )
            )
            .respond_with(
                ResponseTemplate::new(200).set_body_json(
                    json!({
                    "choices": [{ "message": { "role": "assistant", "content": "hi there" } }]
                })
                )
            )
            .expect(1)
            .mount(&server).await;

        let client = OpenAIChatClient::new("sk-test".into(), None, Some(server.uri())).unwrap();
        let resp = client.complete(&request()).await.unwrap();
        assert_eq!(resp.response, "hi there");
    }

    #[tokio::test]
    async fn test_complete_without_choices_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server).await;

        let client = OpenAIChatClient::new("sk-test".into(), None, Some(server.uri())).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn test_complete_propagates_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server).await;

        let client = OpenAIChatClient::new("sk-test".into(), None, Some(server.uri())).unwrap();
        assert!(matches!(client.complete(&request()).await, Err(LlmError::Http(_))));
    }
}
