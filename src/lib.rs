pub mod actions;
pub mod agent;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;
pub mod tokens;
pub mod words;

use agent::Assistant;
use cli::Args;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("HTTP API Port: {:?}", args.http_port);
    info!("History Store Type: {}", args.history_type);
    info!("History Store Host: {}", args.history_host);
    info!("Credential Store Type: {}", args.credentials_type);
    info!("Credential Store Host: {}", args.credentials_host);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("adapter default"));
    info!("Tokenizer Model: {} (fallback {})", args.encoding_model_messages, args.encoding_model_strings);
    info!("Context Token Budget: {}", args.llm_max_tokens);
    info!("Prompts Path: {}", args.prompts_path);
    info!("Response Chunk Size: {}", args.chunk_size);
    info!("-------------------------");

    let assistant = Arc::new(Assistant::from_args(&args)?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, assistant, args);
    server.run().await?;

    Ok(())
}
