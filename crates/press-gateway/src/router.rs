//! Route table and server loop for the Pressline gateway.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post, put};
use axum::Router;
use tracing::info;

use crate::handlers;
use crate::state::GatewayState;

pub const WEBHOOK_PATH: &str = "/webhooks/tracker";
pub const ENTRIES_PATH: &str = "/entries";
pub const ENTRY_PATH: &str = "/entries/{entry_id}";
pub const APPROVAL_PATH: &str = "/entries/{entry_id}/approval";
pub const REGENERATE_PATH: &str = "/entries/{entry_id}/regenerate";
pub const PUBLISH_PATH: &str = "/entries/{entry_id}/publish";
pub const TEMPLATES_PATH: &str = "/templates";
pub const TEMPLATE_TEST_PATH: &str = "/templates/test";
pub const STATUS_PATH: &str = "/status";

/// Builds the gateway router over shared state.
pub fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(handlers::receive_webhook))
        .route(ENTRIES_PATH, get(handlers::list_entries))
        .route(ENTRY_PATH, get(handlers::get_entry))
        .route(APPROVAL_PATH, put(handlers::update_approval))
        .route(REGENERATE_PATH, post(handlers::regenerate_entry))
        .route(PUBLISH_PATH, post(handlers::publish_entry))
        .route(
            TEMPLATES_PATH,
            get(handlers::list_templates).post(handlers::upsert_template),
        )
        .route(TEMPLATE_TEST_PATH, post(handlers::test_template))
        .route(STATUS_PATH, get(handlers::status))
        .with_state(state)
}

/// Binds the configured address and serves until ctrl-c.
pub async fn run_gateway_server(state: Arc<GatewayState>) -> Result<()> {
    let bind = state.config.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind gateway listener on {bind}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve gateway listener address")?;
    info!(%local_addr, "gateway listening");

    let router = build_gateway_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server terminated unexpectedly")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to install ctrl-c handler");
        return;
    }
    info!("shutdown signal received");
}
