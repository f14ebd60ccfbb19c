use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stresswatch_controller::{
    ApiObjectStore, ChaosController, ControllerConfig, HealthConfig, HealthServer,
    LocalObjectStore, ObjectStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "stresswatch",
    about = "Activates paused chaos experiments once their stress test pods are running"
)]
struct Cli {
    /// Controller configuration file (YAML)
    #[arg(long, global = true, env = "STRESSWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Number of concurrent reconcile workers (overrides the config file)
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Address for the /healthz, /livez and /readyz endpoints
    #[arg(long, global = true, default_value = "0.0.0.0:8081")]
    health_bind: String,
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile against a Kubernetes API server
    Run {
        /// API server URL
        #[arg(long, env = "STRESSWATCH_API_URL")]
        api_url: String,
        /// Bearer token for the API server
        #[arg(long, env = "STRESSWATCH_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Reconcile against an embedded store (development and testing)
    Standalone {
        /// Path to the redb database file
        #[arg(long, default_value = "./stresswatch.redb")]
        data_dir: PathBuf,
        /// YAML manifests with Pods and NetworkChaos objects to load at start
        #[arg(long)]
        manifest: Vec<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_format);

    let config = load_config(cli.config.as_deref(), cli.workers)?;
    let health_addr: SocketAddr = cli
        .health_bind
        .parse()
        .map_err(|e| miette::miette!("Invalid health bind address '{}': {}", cli.health_bind, e))?;

    match cli.command {
        Commands::Run { api_url, token } => {
            info!("Starting stresswatch against API server {}", api_url);
            let mut store = ApiObjectStore::new(&api_url);
            if let Some(token) = token {
                store = store.with_token(token);
            }
            run_controller(Arc::new(store), None, config, health_addr).await
        }
        Commands::Standalone { data_dir, manifest } => {
            info!("Starting stresswatch with embedded store at {}", data_dir.display());
            let store = LocalObjectStore::open(&data_dir)?;
            for path in &manifest {
                let count = store.load_manifest_file(path)?;
                info!("Loaded {} objects from {}", count, path.display());
            }
            let events = store.subscribe();
            run_controller(Arc::new(store), Some(events), config, health_addr).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>, workers: Option<usize>) -> miette::Result<ControllerConfig> {
    let mut config = match path {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };
    if let Some(workers) = workers {
        config.workers = workers;
        config.validate()?;
    }
    Ok(config)
}

/// Run the controller and health server until Ctrl-C
async fn run_controller(
    store: Arc<dyn ObjectStore>,
    events: Option<tokio::sync::broadcast::Receiver<stresswatch_core::ResourceEvent>>,
    config: ControllerConfig,
    health_addr: SocketAddr,
) -> miette::Result<()> {
    let controller = ChaosController::new(store, config)?;
    let token = CancellationToken::new();

    let health = HealthServer::new(
        HealthConfig {
            listen_addr: health_addr,
        },
        controller.readiness(),
    );
    let health_token = token.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health.run(health_token).await {
            error!("Health server error: {}", e);
        }
    });

    let controller_token = token.clone();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(events, controller_token).await {
            error!("Chaos controller error: {}", e);
        }
    });

    info!("All components started. Health endpoints on {}", health_addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    // Wait for all tasks to finish with a timeout
    let shutdown_timeout = std::time::Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(health_handle, controller_handle);
    })
    .await;

    info!("Shutdown complete");

    Ok(())
}
