use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use discflow::config::load_config_with_env;
use discflow::{
    ActivityGateway, Config, Database, Engine, EngineConfig, ExpirySweeper, JobGateway,
    JobProgressBroadcaster,
};
use discflow_server::{app, AppState};

#[derive(Debug, Parser)]
#[command(name = "discflow-server", version, about = "Disc ingestion service")]
struct Cli {
    /// JSON config file. Without one, settings come from DISCFLOW_* variables.
    #[arg(long, short, env = "DISCFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

fn init_logging() {
    // Route `log` records from the library into tracing.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer());
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }
}

fn load(path: Option<&Path>) -> Result<Config, discflow::ConfigError> {
    match path {
        Some(path) => load_config_with_env(path),
        None => Config::from_env(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let cli = Cli::parse();

    let config = load(cli.config.as_deref())?;
    let addr: SocketAddr = match cli.listen {
        Some(addr) => addr,
        None => config.listen_addr.parse()?,
    };

    tracing::info!("Starting discflow v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::open(Path::new(&config.database_path))?;
    let engine = Engine::new(
        db,
        EngineConfig::from_config(&config),
        ActivityGateway::from_config(&config),
        JobProgressBroadcaster::default(),
    );

    let recovering = engine.clone();
    tokio::spawn(async move {
        match recovering.recover().await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Resumed {} job(s)", n),
            Err(e) => tracing::error!("Startup recovery failed: {}", e),
        }
    });

    let sweeper = ExpirySweeper::new(
        engine.clone(),
        Duration::from_secs(config.timeouts.sweep_interval_secs),
    );
    let sweeper_handle = sweeper.start();

    let state = AppState::new(JobGateway::new(engine, config.store_retry_attempts));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    let result = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.stop();
    if let Err(e) = sweeper_handle.await {
        tracing::warn!("Expiry sweeper ended abnormally: {}", e);
    }
    result?;
    Ok(())
}
