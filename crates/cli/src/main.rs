mod channel_commands;

use std::sync::Arc;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    marketsync_channels::{HandlerRegistry, store_sqlite::SqliteStore},
    marketsync_config::MarketsyncConfig,
    marketsync_cron::{ChannelsManagerFactory, ManagerSettings},
    marketsync_ozon::OzonHandler,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "marketsync", about = "Marketplace channel scheduler and sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/marketsync/).
    #[arg(long, global = true, env = "MARKETSYNC_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule every active channel and run until interrupted (default).
    Serve,
    /// Run one channel once.
    Trigger(channel_commands::TriggerArgs),
    /// Print the marketplace category tree of a channel.
    Categories {
        tenant: String,
        channel: String,
    },
    /// Show recent executions of a channel.
    Executions {
        channel_id: i64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<MarketsyncConfig> {
    match &cli.config {
        Some(path) => {
            let mut config = marketsync_config::load_config(path)?;
            marketsync_config::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            Ok(config)
        },
        None => Ok(marketsync_config::discover_and_load()),
    }
}

/// Storage plus every registered channel handler.
pub(crate) struct Runtime {
    pub config: MarketsyncConfig,
    pub store: Arc<SqliteStore>,
    pub handlers: HandlerRegistry,
}

impl Runtime {
    pub(crate) async fn open(config: MarketsyncConfig) -> anyhow::Result<Self> {
        let store = Arc::new(
            SqliteStore::new(&config.database.url, config.database.max_connections)
                .await
                .with_context(|| format!("failed to open database {}", config.database.url))?,
        );
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(
            OzonHandler::new(&config, store.clone()).context("failed to build Ozon handler")?,
        ));
        Ok(Self {
            config,
            store,
            handlers,
        })
    }

    pub(crate) fn factory(&self) -> ChannelsManagerFactory {
        ChannelsManagerFactory::new(
            self.handlers.clone(),
            self.store.clone(),
            ManagerSettings::from(&self.config.scheduler),
        )
    }
}

async fn serve(runtime: Runtime) -> anyhow::Result<()> {
    let factory = runtime.factory();
    let channels = factory.init(&runtime.config.scheduler.tenants).await?;
    info!(
        channels,
        tenants = factory.managers().len(),
        scheduler = runtime.config.scheduler.enabled,
        "marketsync running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    factory.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "marketsync starting");

    let config = load_config(&cli)?;
    let runtime = Runtime::open(config).await?;

    match cli.command {
        None | Some(Commands::Serve) => serve(runtime).await,
        Some(Commands::Trigger(args)) => channel_commands::trigger(&runtime, args).await,
        Some(Commands::Categories { tenant, channel }) => {
            channel_commands::categories(&runtime, &tenant, &channel).await
        },
        Some(Commands::Executions { channel_id, limit }) => {
            channel_commands::executions(&runtime, channel_id, limit).await
        },
    }
}
