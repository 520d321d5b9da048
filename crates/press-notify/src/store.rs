//! JSON-file persistence for chat message templates.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use press_core::{current_unix_timestamp_ms, write_text_atomic};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPLATE_NAME: &str = "review-request";
pub const DEFAULT_TEMPLATE_TEXT: &str = "New {contentType} awaiting review: \
*{contentTitle}* (quality {qualityScore})\n{contentUrl}\nCreated {createdDate}";

const TEMPLATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A named chat message template.
pub struct MessageTemplate {
    pub name: String,
    pub channel: String,
    pub template: String,
    pub enabled: bool,
    pub updated_unix_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplateFile {
    schema_version: u32,
    #[serde(default)]
    templates: BTreeMap<String, MessageTemplate>,
}

impl Default for TemplateFile {
    fn default() -> Self {
        Self {
            schema_version: TEMPLATE_SCHEMA_VERSION,
            templates: BTreeMap::new(),
        }
    }
}

/// Loads and persists message templates with atomic writes.
#[derive(Debug)]
pub struct TemplateStore {
    path: PathBuf,
    state: Mutex<TemplateFile>,
}

impl TemplateStore {
    pub fn load(path: PathBuf, default_channel: &str) -> Result<Self> {
        let mut state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read template file {}", path.display()))?;
            serde_json::from_str::<TemplateFile>(&raw)
                .with_context(|| format!("failed to parse template file {}", path.display()))?
        } else {
            TemplateFile::default()
        };

        if state.schema_version != TEMPLATE_SCHEMA_VERSION {
            bail!(
                "unsupported template file schema: expected {}, found {}",
                TEMPLATE_SCHEMA_VERSION,
                state.schema_version
            );
        }

        if !state.templates.contains_key(DEFAULT_TEMPLATE_NAME) {
            state.templates.insert(
                DEFAULT_TEMPLATE_NAME.to_string(),
                MessageTemplate {
                    name: DEFAULT_TEMPLATE_NAME.to_string(),
                    channel: default_channel.to_string(),
                    template: DEFAULT_TEMPLATE_TEXT.to_string(),
                    enabled: true,
                    updated_unix_ms: current_unix_timestamp_ms(),
                },
            );
        }

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn get(&self, name: &str) -> Option<MessageTemplate> {
        let state = self.state.lock().expect("template store lock poisoned");
        state.templates.get(name).cloned()
    }

    pub fn list(&self) -> Vec<MessageTemplate> {
        let state = self.state.lock().expect("template store lock poisoned");
        state.templates.values().cloned().collect()
    }

    /// Creates or replaces a template and persists the file.
    pub fn upsert(&self, mut template: MessageTemplate) -> Result<MessageTemplate> {
        let name = template.name.trim().to_string();
        if name.is_empty() {
            bail!("template name cannot be empty");
        }
        if template.template.trim().is_empty() {
            bail!("template text cannot be empty");
        }
        template.name = name.clone();
        template.updated_unix_ms = current_unix_timestamp_ms();

        let mut state = self.state.lock().expect("template store lock poisoned");
        state.templates.insert(name, template.clone());
        let payload = serde_json::to_string_pretty(&*state)
            .context("failed to serialize template file")?;
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageTemplate, TemplateStore, DEFAULT_TEMPLATE_NAME};

    #[test]
    fn functional_load_seeds_default_template() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store =
            TemplateStore::load(dir.path().join("templates.json"), "#releases").expect("load");
        let template = store.get(DEFAULT_TEMPLATE_NAME).expect("default template");
        assert!(template.enabled);
        assert_eq!(template.channel, "#releases");
        assert!(template.template.contains("{contentTitle}"));
    }

    #[test]
    fn functional_upsert_persists_across_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("templates.json");
        let store = TemplateStore::load(path.clone(), "#releases").expect("load");
        store
            .upsert(MessageTemplate {
                name: "terse".to_string(),
                channel: "#releases".to_string(),
                template: "{contentTitle}".to_string(),
                enabled: true,
                updated_unix_ms: 0,
            })
            .expect("upsert");

        let reloaded = TemplateStore::load(path, "#releases").expect("reload");
        let template = reloaded.get("terse").expect("persisted template");
        assert_eq!(template.template, "{contentTitle}");
        assert!(template.updated_unix_ms > 0);
    }

    #[test]
    fn unit_upsert_rejects_empty_name_and_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store =
            TemplateStore::load(dir.path().join("templates.json"), "#releases").expect("load");
        assert!(store
            .upsert(MessageTemplate {
                name: "  ".to_string(),
                channel: "#releases".to_string(),
                template: "x".to_string(),
                enabled: true,
                updated_unix_ms: 0,
            })
            .is_err());
        assert!(store
            .upsert(MessageTemplate {
                name: "empty".to_string(),
                channel: "#releases".to_string(),
                template: "   ".to_string(),
                enabled: true,
                updated_unix_ms: 0,
            })
            .is_err());
    }
}
