mod config;
mod db;
mod domain;
mod error;
mod frame;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use config::{AppConfig, StoreBackend};
use services::session::{Authenticator, MemorySessions, PgSessions};
use store::{EntityStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env().expect("invalid configuration");

    let (store, auth): (Arc<dyn EntityStore>, Arc<dyn Authenticator>) = match &config.backend {
        StoreBackend::Postgres { database_url, max_connections } => {
            let pool = db::init_pool(database_url, *max_connections)
                .await
                .expect("database init failed");
            (Arc::new(PgStore::new(pool.clone())), Arc::new(PgSessions::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("STORE_BACKEND=memory: state is lost on restart");
            (Arc::new(MemoryStore::new()), Arc::new(MemorySessions::new()))
        }
    };

    let state = state::AppState::new(store, auth, config.connection_queue_capacity);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "servicehub listening");
    axum::serve(listener, app).await.expect("server failed");
}
