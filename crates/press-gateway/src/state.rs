//! Gateway state wiring: every collaborator is constructed at startup and
//! passed in explicitly; no process-wide singletons.

use std::sync::Arc;

use press_generator::DraftGenerator;
use press_notify::{ChatNotifier, TemplateStore};
use press_store::ChangelogStore;
use press_tracker::{EventFilter, TrackerClient};

#[derive(Debug, Clone)]
/// Public struct `GatewayConfig` used across Pressline components.
pub struct GatewayConfig {
    pub bind: String,
    pub event_filter: EventFilter,
    /// Tracker custom-field id receiving the approved summary.
    pub sync_back_field_id: String,
    /// Base URL for `{contentUrl}` tokens; empty renders the entry id alone.
    pub public_base_url: String,
}

/// Shared per-request state handed to every handler.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub store: Arc<dyn ChangelogStore>,
    pub generator: Arc<DraftGenerator>,
    pub tracker: Arc<dyn TrackerClient>,
    pub notifier: ChatNotifier,
    pub templates: Arc<TemplateStore>,
}

impl GatewayState {
    pub fn entry_url(&self, entry_id: &str) -> String {
        let base = self.config.public_base_url.trim_end_matches('/');
        if base.is_empty() {
            return entry_id.to_string();
        }
        format!("{base}/entries/{entry_id}")
    }
}
