use clap::Parser;
use dropsite::error::{ErrorKind, Result};
use dropsite::{AppState, router};
use dropsite_config::Config;
use dropsite_storage::WorkspaceStore;
use exn::ResultExt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Provision project workspaces, accept uploads, publish them under `/p`.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// TOML configuration file (defaults to the platform config directory).
    #[arg(short, long, env = "DROPSITE_CONFIG")]
    config: Option<PathBuf>,
    /// Address to listen on, overriding the configuration.
    #[arg(short, long)]
    bind: Option<SocketAddr>,
    /// Storage root, overriding the configuration.
    #[arg(short, long)]
    storage_root: Option<PathBuf>,
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref()).or_raise(|| ErrorKind::Config)?;
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(storage_root) = &self.storage_root {
            config.storage_root = storage_root.clone();
        }
        config.validate().or_raise(|| ErrorKind::Config)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log_level) {
        eprintln!("{err:?}");
        return ExitCode::FAILURE;
    }
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "Fatal error");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config()?;
    let store = WorkspaceStore::open(&config.storage_root).or_raise(|| ErrorKind::Storage)?;
    let app = router(AppState::new(store, &config));

    let listener =
        TcpListener::bind(config.bind_address).await.or_raise(|| ErrorKind::Bind(config.bind_address))?;
    tracing::info!(address = %config.bind_address, "Listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.or_raise(|| ErrorKind::Serve)?;
    tracing::info!("Shut down");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .or_raise(|| ErrorKind::Logging)?;
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(%err, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(err) => {
                tracing::warn!(%err, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
