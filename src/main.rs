mod collectors;
mod config;
mod http;
mod metrics;
mod reporter;
mod sample;
mod state;
mod transport;

use axum::serve;
use clap::Parser;
use collectors::system::SysinfoSource;
use config::{Config, ConfigError, Credentials};
use metrics::{now_unix, Metrics};
use reporter::{resolve_identity, MissingTenantId, Reporter};
use state::State;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use transport::{TransportError, WsTransport};

#[derive(Parser, Debug)]
#[command(name = "reportd")]
#[command(version)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `endpoint` from the config file.
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    print_default_config: bool,
}

/// Startup failures. Each one maps to its own exit code.
#[derive(Debug, Error)]
enum Fatal {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to initialise metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    MissingTenant(#[from] MissingTenantId),
}

impl Fatal {
    fn exit_code(&self) -> i32 {
        match self {
            Fatal::Metrics(_) => 1,
            Fatal::Config(ConfigError::MissingApiKey(_)) => 3,
            Fatal::Config(ConfigError::MissingContainerId(_)) => 4,
            Fatal::Config(_) => 2,
            Fatal::Transport(TransportError::InvalidKey) => 3,
            Fatal::Transport(_) => 5,
            Fatal::MissingTenant(_) => 6,
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    if let Err(err) = run(cli).await {
        error!(error = %err, "reportd could not start");
        std::process::exit(err.exit_code());
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<(), Fatal> {
    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "loaded environment file"),
        Err(err) if err.not_found() => debug!("no .env file, using process environment"),
        Err(err) => warn!(error = %err, "failed to read .env file"),
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    if let Some(endpoint) = cli.endpoint {
        cfg.endpoint = endpoint;
        cfg.validate()?;
    }
    let credentials = Credentials::from_env(&cfg)?;

    info!(
        endpoint = %cfg.endpoint,
        profile = cfg.profile.as_str(),
        interval = %humantime::format_duration(cfg.interval),
        "starting reportd"
    );

    let metrics = Metrics::new()?;
    let (transport, handshake) = WsTransport::connect(&cfg.endpoint, &credentials.api_key).await?;
    let identity = resolve_identity(
        cfg.profile,
        &credentials,
        &handshake,
        cfg.include_key_in_payload,
    )?;

    let mut state = State::new(now_unix(), cfg.endpoint.clone(), cfg.profile);
    state.tenant_id = identity.tenant_id.clone();
    state.container_id = identity.container_id.clone();
    let shared_state = Arc::new(RwLock::new(state));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let http_task = cfg.listen.clone().map(|listen| {
        spawn_http(
            listen,
            metrics.clone(),
            shared_state.clone(),
            shutdown_rx.clone(),
        )
    });

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            return;
        }
        info!("received Ctrl+C, shutting down");
        let _ = shutdown_tx.send(true);
    });

    let source = SysinfoSource::new(cfg.cpu_window, cfg.disk_mount.clone());
    Reporter::new(source, transport, identity, &cfg, metrics, shared_state)
        .run(shutdown_rx)
        .await;

    if let Some(task) = http_task {
        let _ = task.await;
    }
    Ok(())
}

fn spawn_http(
    listen: String,
    metrics: Arc<Metrics>,
    state: Arc<RwLock<State>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = http::build_router(metrics, state);
        let addr: SocketAddr = match listen.parse() {
            Ok(addr) => addr,
            Err(err) => {
                error!(error = %err, listen = %listen, "invalid listen address");
                return;
            }
        };

        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(err) => {
                error!(error = %err, listen = %listen, "failed to start status endpoint");
                return;
            }
        };
        info!(listen = %addr, "status endpoint listening");

        let server = serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });

        if let Err(err) = server.await {
            error!(error = %err, "status endpoint failed");
        }
    })
}
