//! docshift HTTP server.
//!
//! Usage: `docshift-server [config.json]`. The config path may also be given
//! through `DOCSHIFT_CONFIG`; without one the defaults apply. `DOCSHIFT_*`
//! environment variables override individual settings.

mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;

use docshift::config::{apply_env_overrides, load_config, Config, LogFormat};
use docshift::{router, AppState, Database, DocshiftError, FileStorage};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "docshift=info,docshift_server=info,tower_http=info";

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("docshift-server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(config.logging.format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("DOCSHIFT_CONFIG").map(PathBuf::from))
}

fn load() -> Result<Config, DocshiftError> {
    let mut config = match config_path() {
        Some(path) => load_config(&path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(registry.with(fmt::layer().json())),
        LogFormat::Pretty => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };
    if let Err(e) = installed {
        eprintln!("docshift-server: failed to install tracing subscriber: {}", e);
    }

    // Migration and database messages go through `log`.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("docshift-server: failed to bridge log records: {}", e);
    }
}

async fn run(config: Config) -> Result<(), DocshiftError> {
    let db = Database::open(&config.database.path)?;
    let storage = FileStorage::new(&config.storage.root);
    let address = format!("{}:{}", config.server.host, config.server.port);

    tracing::info!(
        environment = ?config.environment,
        storage = %config.storage.root.display(),
        "Starting docshift"
    );

    let app = router(AppState::new(db.clone(), storage, config));
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    db.close()?;
    Ok(())
}
