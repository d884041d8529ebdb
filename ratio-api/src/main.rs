//! Ratio API Server
//!
//! HTTP surface over a single wallet session: connect, log in, manage the
//! agent wallet and trade baskets on the perp platform.

mod error;
mod routes;

use axum::{
    http::{header, Method},
    Router,
};
use ratio_trading::{
    JsonRpcWalletProvider, LocalWalletProvider, PlatformConfig, Session, WalletProvider,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub config: Arc<PlatformConfig>,
}

/// Pick the wallet provider from the environment
///
/// `WALLET_RPC_URL` selects a JSON-RPC wallet bridge; otherwise
/// `TRADING_PRIVATE_KEY` selects a local signer. Neither leaves the session
/// without a provider and `connect` reports it.
fn wallet_provider(config: &PlatformConfig) -> Option<Arc<dyn WalletProvider>> {
    if let Ok(url) = std::env::var("WALLET_RPC_URL") {
        info!("Using JSON-RPC wallet at {}", url);
        return Some(Arc::new(JsonRpcWalletProvider::new(url, config.http_timeout)));
    }

    match LocalWalletProvider::from_env(config.chain_id) {
        Ok(wallet) => Some(Arc::new(wallet)),
        Err(e) => {
            warn!("No wallet provider configured: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ratio_api=debug,ratio_trading=debug")),
        )
        .init();

    info!("Starting Ratio API");

    let config = PlatformConfig::from_env();
    info!(
        "Platform {} (client {}), chain {}",
        config.api_url, config.client_id, config.chain_id
    );

    let provider = wallet_provider(&config);
    let session = Arc::new(Session::from_config(config.clone(), provider)?);

    // Account and chain changes from the wallet invalidate cached state
    if session.spawn_event_listener().is_some() {
        info!("Listening for wallet events");
    }

    let state = AppState {
        session,
        config: Arc::new(config),
    };

    // Configure CORS for frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = Router::new()
        .nest("/api", routes::api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let port = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
