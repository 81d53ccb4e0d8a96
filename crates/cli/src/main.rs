mod auth_commands;
mod tool_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    outlook_config::OutlookConfig,
    outlook_graph::GraphClient,
    outlook_mcp::McpServer,
    outlook_oauth::SessionManager,
    outlook_tools::{ToolContext, ToolRegistry},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "outlook-assistant",
    about = "Microsoft Graph (Outlook, Teams) tools over MCP",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to <config dir>/outlook-mcp/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tools over MCP on stdin/stdout (default).
    Serve,
    /// Manage the Microsoft sign-in.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// Inspect or invoke tools directly.
    Tools {
        #[command(subcommand)]
        action: tool_commands::ToolsAction,
    },
}

/// Logs go to stderr; stdout carries the MCP protocol.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Process-wide services built once from the loaded config.
pub(crate) struct App {
    pub session: Arc<SessionManager>,
    pub registry: Arc<ToolRegistry>,
}

impl App {
    fn build(config: OutlookConfig) -> anyhow::Result<Self> {
        let OutlookConfig { auth, graph } = config;
        let session = Arc::new(SessionManager::new(Arc::new(auth)));
        let graph = GraphClient::new(&graph).context("failed to build Graph HTTP client")?;
        let ctx = Arc::new(ToolContext::new(Arc::clone(&session), graph));
        Ok(Self {
            session,
            registry: Arc::new(ToolRegistry::with_builtin(ctx)),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "outlook-assistant starting");

    let config = outlook_config::load(cli.config.as_deref())?;
    let app = App::build(config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => McpServer::new(Arc::clone(&app.registry)).serve_stdio().await,
        Commands::Auth { action } => auth_commands::handle_auth(&app, action).await,
        Commands::Tools { action } => tool_commands::handle_tools(&app, action).await,
    }
}
