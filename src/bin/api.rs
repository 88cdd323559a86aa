use clap::Parser;
use moara::{
    api::{start_server, ApiState},
    config::AssistantConfig,
    llm::select_adapter,
    loader::DataLoader,
    session::AnswerMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Moara - API HTTP do assistente financeiro
#[derive(Parser, Debug)]
#[command(name = "moara-api", version, about)]
struct Args {
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Default answer mode for new sessions
    #[arg(long)]
    dynamic: bool,

    /// Overrides PORT / API_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = AssistantConfig::from_env()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(port) = args.port {
        config.api_port = port;
    }
    let mode = if args.dynamic {
        AnswerMode::Dynamic
    } else {
        AnswerMode::Routed
    };

    info!("Moara - API Server");
    info!("Port: {}", config.api_port);

    let data = DataLoader::new(&config.data_dir).load_all().map_err(|e| {
        error!(data_dir = %config.data_dir.display(), "Failed to load data: {}", e);
        e
    })?;

    let adapter = select_adapter(&config.llm);
    let port = config.api_port;
    let state = ApiState::new(Arc::new(data), adapter, config, mode);

    info!(mode = ?mode, "Starting API server...");
    start_server(state, port).await?;

    Ok(())
}
