use std::net::SocketAddr;
use std::process::ExitCode;

use backbone::config::{self, ConfigError};
use backbone::db::{ConnectionManager, DbError};
use backbone::services::firebase::{DEFAULT_CREDENTIALS_PATH, InitError};
use backbone::services::identity::IdentityRegistry;
use backbone::{logging, routes, state};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("identity verifier init failed: {0}")]
    Verifier(#[from] InitError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is normal outside local development.
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StartupError> {
    let env = config::process_env();
    let raw_port = config::or_default(&env, "PORT", "8080");
    let port: u16 = raw_port
        .parse()
        .map_err(|_| ConfigError::Invalid { key: "PORT".into(), value: raw_port.clone() })?;
    let credentials = config::or_default(&env, "FIREBASE_CREDENTIALS", DEFAULT_CREDENTIALS_PATH);

    let connections = ConnectionManager::new();
    let db = connections.init_db().await?;

    let identity = IdentityRegistry::new();
    let verifier = identity.init_verifier(&credentials).await?;

    let app = routes::app(state::AppState::new(db, verifier));
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;

    tracing::info!(%port, "backbone listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
