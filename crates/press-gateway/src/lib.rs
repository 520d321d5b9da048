//! HTTP surface for the changelog pipeline: webhook ingestion, approval,
//! regeneration, template configuration, and server bootstrap.

mod handlers;
mod pipeline;
mod router;
mod state;
mod types;


pub use router::{build_gateway_router, run_gateway_server};
pub use state::{GatewayConfig, GatewayState};
pub use types::WebhookResponse;
