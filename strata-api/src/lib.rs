//! HTTP surface of a strata node: the JSON bridge that maps every
//! registered method 1:1 onto an endpoint, and the websocket channel that
//! pushes bus events to authenticated subscribers.

pub mod bridge;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use strata_core::{Error, Instance};
use tower_http::trace::TraceLayer;

pub use bridge::bridge_router;
pub use ws::{EventChannel, EVENTS_PATH, SUBPROTOCOL};

/// The full API router: every bridge endpoint plus the event channel.
pub async fn api_router(inst: &Instance) -> (Router, Arc<EventChannel>) {
    let channel = EventChannel::attach(inst.keystore(), inst.bus()).await;
    let router = bridge_router(inst)
        .merge(channel.router())
        .layer(TraceLayer::new_for_http());
    (router, channel)
}

/// Bind and serve the API until the instance shuts down.
pub async fn serve(inst: Instance, address: &str) -> Result<(), Error> {
    let (router, _channel) = api_router(&inst).await;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|e| Error::dependency(format!("binding {address}: {e}")))?;
    let ctx = inst.context();
    tracing::info!(%address, "api listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { ctx.cancellation().cancelled().await })
        .await
        .map_err(|e| Error::dependency(format!("serving api: {e}")))
}
