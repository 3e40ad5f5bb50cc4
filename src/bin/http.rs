#[cfg(feature = "http_api")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::Arc;

    use clinic_scheduler::{BookingEngine, ServerConfig, SqliteStore, http_api};
    use tracing::{Level, info};
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;

    let store = Arc::new(SqliteStore::new(&config.database_path)?);
    let engine = BookingEngine::with_sqlite(store, config.engine.clone());

    info!(
        addr = %config.addr,
        database = %config.database_path.display(),
        "clinic-scheduler HTTP API listening"
    );
    http_api::serve(config.addr, engine).await?;
    Ok(())
}

#[cfg(not(feature = "http_api"))]
fn main() {
    eprintln!("Rebuild with the `http_api` feature to enable the HTTP server.");
}
