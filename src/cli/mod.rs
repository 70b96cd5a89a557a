pub mod console;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- History Store Args ---
    /// History store type (memory, redis, sqlite)
    #[arg(long, env = "HISTORY_TYPE", default_value = "memory")]
    pub history_type: String,

    /// History store host endpoint for redis (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "chat:")]
    pub history_redis_prefix: String,

    /// Database file for the sqlite history store.
    #[arg(long, env = "HISTORY_SQLITE_PATH", default_value = "data/history.db")]
    pub history_sqlite_path: String,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (openai, ollama)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider
    #[arg(long, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gpt-4, llama3)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Sampling temperature for chat replies.
    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub chat_temperature: f32,

    // --- Conversation Memory Args ---
    /// Model used to maintain the running conversation summary. Defaults to CHAT_MODEL.
    #[arg(long, env = "SUMMARY_MODEL")]
    pub summary_model: Option<String>,

    /// Sampling temperature for summary updates.
    #[arg(long, env = "SUMMARY_TEMPERATURE", default_value = "0")]
    pub summary_temperature: f32,

    /// Number of recent turns kept verbatim per session. 0 keeps every turn.
    #[arg(long, env = "MEMORY_WINDOW", default_value = "10")]
    pub memory_window: usize,

    /// Name given to sessions created implicitly by a chat request.
    #[arg(long, env = "DEFAULT_SESSION_NAME", default_value = "New Chat")]
    pub default_session_name: String,

    /// Optional JSON file overriding the built-in prompt templates.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    // --- Server Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "0.0.0.0:3001")]
    pub server_addr: String,

    /// Allowed CORS origins, comma separated. Defaults depend on --production.
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Production mode: restricts the default CORS origins to the published front end.
    #[arg(long, env = "PRODUCTION", default_value = "false")]
    pub production: bool,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Chat on the terminal instead of starting the HTTP server.
    #[arg(long, default_value = "false")]
    pub console: bool,
}

const PRODUCTION_ORIGINS: &[&str] = &["https://fieldpalmer.github.io"];
const DEVELOPMENT_ORIGINS: &[&str] = &["http://localhost:5173", "http://localhost:3000"];

impl Args {
    pub fn allowed_origins(&self) -> Vec<String> {
        let configured: Vec<String> = self.cors_origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        if !configured.is_empty() {
            return configured;
        }
        let defaults = if self.production { PRODUCTION_ORIGINS } else { DEVELOPMENT_ORIGINS };
        defaults.iter().map(|o| o.to_string()).collect()
    }
}
