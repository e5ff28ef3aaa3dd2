use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use agent_relay::agent::{ConversationStore, Orchestrator, spawn_pending_sweeper};
use agent_relay::channels::HttpChannel;
use agent_relay::config::{Config, LogFormat, LoggingConfig};
use agent_relay::llm::create_llm_provider;
use agent_relay::tools::ToolRegistry;
use agent_relay::workspace::WorkspaceManager;

#[derive(Parser, Debug)]
#[command(name = "agent-relay", version, about = "Agentic chat backend with sandboxed tools")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "API_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "API_PORT")]
    port: Option<u16>,

    /// Base directory for conversation workspaces
    #[arg(long, env = "WORKSPACE_DIR")]
    workspace_dir: Option<std::path::PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = self.workspace_dir {
            config.agent.workspace_dir = dir;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before the environment is read, so --help works with a broken .env
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    cli.apply(&mut config);

    init_logging(&config.logging);

    let workspaces = Arc::new(WorkspaceManager::new(&config.agent.workspace_dir));
    workspaces.init().await?;

    let registry = Arc::new(ToolRegistry::new());
    registry.register_builtin_tools(&config.tools).await;

    let store = Arc::new(ConversationStore::new(Arc::clone(&workspaces)));
    let provider = create_llm_provider(&config.llm);
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        provider,
        Arc::clone(&workspaces),
        config.orchestrator(),
    );

    let sweeper = spawn_pending_sweeper(
        Arc::clone(&store),
        config.agent.pending_ttl,
        config.agent.sweep_interval,
    );

    let channel = HttpChannel::new(config.server.clone(), orchestrator);
    let (host, port) = channel.addr();
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        addr = %addr,
        workspace_dir = %config.agent.workspace_dir.display(),
        model = %config.llm.model,
        tools = registry.count().await,
        "Agent relay listening"
    );

    axum::serve(listener, channel.routes())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    sweeper.abort();
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter()));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
    }
}
