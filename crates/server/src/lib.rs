//! Relay server library.
//!
//! Provides a reusable server function to serve Relay either for the binary,
//! or for integration tests.

#![deny(missing_docs)]

mod health;
mod identity;

use std::net::SocketAddr;

use anyhow::anyhow;
use axum::{Router, routing::get};
use config::Config;
use identity::IdentityLayer;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

/// Configuration for serving Relay.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Relay TOML configuration.
    pub config: Config,
}

/// Starts and runs the Relay server with the provided configuration.
pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> anyhow::Result<()> {
    let mut app = Router::new();

    let cors = CorsLayer::permissive();

    // All LLM routes sit behind the identity layer: the upstream
    // authenticator forwards the caller's identity in trusted headers, and
    // requests without one are rejected before any quota or routing work.
    let llm_router = llm::router(&config)?
        .layer(IdentityLayer::new(config.server.identity.clone()))
        .layer(cors.clone());

    app = app.merge(llm_router);

    log::info!("LLM endpoint available at: http://{listen_address}{}", config.llm.path);

    // Health endpoint stays outside the identity layer.
    if config.server.health.enabled {
        let health_router = Router::new()
            .route(&config.server.health.path, get(health::health))
            .layer(cors);

        app = app.merge(health_router);

        log::info!(
            "Health check endpoint exposed at http://{listen_address}{}",
            config.server.health.path
        );
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;

    Ok(())
}
