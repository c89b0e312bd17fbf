use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use picknic::{
    config::NotifierConfig,
    notify::InMemoryNotificationStore,
    server::{self, NotifierState},
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "picknic=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Picknic notifier...");

    let config = NotifierConfig::from_env();
    if config.seed_users.is_empty() {
        tracing::warn!("No users configured; register them via POST /users");
    } else {
        tracing::info!("Seeding {} users", config.seed_users.len());
    }
    let store = Arc::new(InMemoryNotificationStore::with_users(config.seed_users.clone()));

    let app = server::router(NotifierState::new(store))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
