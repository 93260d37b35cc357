use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use labsync::api::{api_router, ApiContext};
use labsync::config;
use labsync::db::sqlite::open_database;
use labsync::db::store::RecordStore;
use labsync::dispatch::HttpDispatcher;
use labsync::scheduling::SchedulingClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let db_path = config::database_path();
    let conn = open_database(&db_path)?;
    let store = RecordStore::new(conn);
    info!(path = %db_path.display(), "database ready");

    let ctx = ApiContext::new(
        store,
        Arc::new(SchedulingClient::from_env()),
        Arc::new(HttpDispatcher::from_env()),
    );
    let app = api_router(ctx);

    let addr = config::bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, version = config::APP_VERSION, "{} listening", config::APP_NAME);
    axum::serve(listener, app).await?;
    Ok(())
}
