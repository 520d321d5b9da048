//! Review notifications: template rendering, template persistence, and
//! best-effort chat delivery.
//!
//! Dispatch runs only after an entry is durably persisted; a delivery
//! failure is logged and recorded on the ephemeral `NotificationRecord`,
//! never propagated to the triggering pipeline call.

mod chat;
mod render;
mod store;

pub use chat::{ChatNotifier, ChatNotifierConfig, NotificationOutcome, NotificationRecord};
pub use render::{render_template, TemplateContext};
pub use store::{MessageTemplate, TemplateStore, DEFAULT_TEMPLATE_NAME, DEFAULT_TEMPLATE_TEXT};
