use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{interfaces::HostError, AppState};

pub mod api;

/// Starts the bridge HTTP server.
pub async fn serve(state: AppState, address: &str) -> anyhow::Result<()> {
    let addr = SocketAddr::from_str(address)
        .map_err(|_| HostError::InvalidAddress(address.to_owned()))?;
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on: {}", listener.local_addr()?);

    let router = api::create_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    axum::serve(listener, router)
        .await
        .context("Server couldn't serve")?;

    Ok(())
}
