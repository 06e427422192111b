mod config;
mod error;
mod routes;


use std::sync::Arc;

use config::AppConfig;
use routes::{app_router, AppState};
use snag_core::db::Database;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("snag_api=info".parse().expect("valid directive"))
                .add_directive("snag_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting snag-api with config: {:?}", config);

    let db = Database::open(&config.db_path).await?;
    let state = AppState::new(config, db);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("snag-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
