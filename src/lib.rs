pub mod agent;
pub mod cli;
pub mod config;
pub mod history;
pub mod llm;
pub mod memory;
pub mod models;
pub mod server;

use agent::ChatAgent;
use cli::Args;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("History Store Type: {}", args.history_type);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("adapter default"));
    info!("Chat Temperature: {}", args.chat_temperature);
    info!("Summary Model: {}", args.summary_model.as_deref().unwrap_or("same as chat"));
    info!("Memory Window: {}", args.memory_window);
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("built-in"));
    info!("Production Mode: {}", args.production);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let history_store = history::initialize_history_store(&args)?;
    let agent = Arc::new(ChatAgent::new(&args, history_store)?);

    if args.console {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        return cli::console::run_console(&agent, stdin, tokio::io::stdout()).await;
    }

    let server = Server::new(args.server_addr.clone(), agent, args);
    server.run().await?;

    Ok(())
}
