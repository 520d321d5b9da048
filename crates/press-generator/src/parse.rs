//! Provider output parsing and shape validation.

use serde_json::Value;
use tracing::warn;

use crate::ChangelogDraft;

/// Parses a provider completion into a draft.
///
/// Providers are instructed to return a single JSON object; code fences are
/// tolerated. A `highlights` value in a non-array shape is coerced to an
/// empty list with a warning rather than failing the attempt.
pub fn parse_draft(text: &str) -> Result<ChangelogDraft, String> {
    let stripped = strip_code_fences(text);
    let value: Value = serde_json::from_str(stripped.trim())
        .map_err(|error| format!("completion is not valid JSON: {error}"))?;
    let object = value
        .as_object()
        .ok_or_else(|| "completion is not a JSON object".to_string())?;

    let customer_title = object
        .get("customer_title")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if customer_title.is_empty() {
        return Err("customer_title is missing or empty".to_string());
    }

    let customer_description = object
        .get("customer_description")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let highlights = match object.get("highlights") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Some(other) => {
            warn!(
                shape = %value_shape(other),
                "provider returned highlights in a non-array shape; coercing to empty"
            );
            Vec::new()
        }
    };

    let category = object
        .get("category")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|category| !category.is_empty())
        .unwrap_or("improvement")
        .to_ascii_lowercase();

    let breaking_changes = object
        .get("breaking_changes")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let migration_notes = object
        .get("migration_notes")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|notes| !notes.is_empty())
        .map(str::to_string);

    Ok(ChangelogDraft {
        customer_title,
        customer_description,
        highlights,
        category,
        breaking_changes,
        migration_notes,
    })
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag after the opening fence.
    let rest = rest
        .split_once('\n')
        .map(|(_, body)| body)
        .unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn value_shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
