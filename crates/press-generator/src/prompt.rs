//! Prompt assembly for draft generation and regeneration.

use press_ai::Message;
use press_tracker::{IssueEvent, IssueSnapshot};

const SYSTEM_PROMPT: &str = "You write customer-facing changelog entries for a \
software product. Respond with a single JSON object and nothing else, using \
exactly these keys: customer_title (string), customer_description (string), \
highlights (array of strings), category (one of feature, improvement, fix, \
security, deprecation), breaking_changes (boolean), migration_notes (string \
or null). Write for customers: plain language, benefits first, no internal \
ticket jargon.";

/// Builds the provider messages for initial generation from one issue event.
pub fn build_generation_messages(event: &IssueEvent) -> Vec<Message> {
    let mut details = String::new();
    details.push_str(&format!("Issue key: {}\n", event.issue_key));
    details.push_str(&format!("Summary: {}\n", event.summary));
    if !event.description.trim().is_empty() {
        details.push_str(&format!("Description: {}\n", event.description));
    }
    details.push_str(&format!("Status: {}\n", event.status_name));
    if !event.labels.is_empty() {
        details.push_str(&format!("Labels: {}\n", event.labels.join(", ")));
    }
    if let Some(priority) = &event.priority {
        details.push_str(&format!("Priority: {priority}\n"));
    }

    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(format!(
            "Write a changelog entry for this completed work item:\n\n{details}"
        )),
    ]
}

/// Builds the provider messages for regeneration, enriched with the related
/// stories that resolved successfully.
pub fn build_regeneration_messages(
    issue_key: &str,
    current_title: &str,
    current_description: &str,
    related: &[IssueSnapshot],
) -> Vec<Message> {
    let mut details = String::new();
    details.push_str(&format!("Issue key: {issue_key}\n"));
    details.push_str(&format!("Current title: {current_title}\n"));
    details.push_str(&format!("Current description: {current_description}\n"));
    if !related.is_empty() {
        details.push_str("\nRelated completed stories to fold in:\n");
        for snapshot in related {
            details.push_str(&format!("- {}: {}", snapshot.key, snapshot.summary));
            if !snapshot.description.trim().is_empty() {
                details.push_str(&format!(" ({})", snapshot.description.trim()));
            }
            details.push('\n');
        }
    }

    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(format!(
            "Rewrite this changelog entry, improving the copy and incorporating \
the related stories where they add customer value:\n\n{details}"
        )),
    ]
}

#[cfg(test)]
mod tests {
    use press_tracker::IssueSnapshot;

    use super::{build_generation_messages, build_regeneration_messages};

    #[test]
    fn unit_generation_messages_carry_issue_details() {
        let event = press_tracker::IssueEvent {
            issue_key: "PRESS-100".to_string(),
            summary: "Add CSV export".to_string(),
            description: "Customers can export reports.".to_string(),
            status_name: "Done".to_string(),
            status_category: "done".to_string(),
            labels: vec!["customer-impact".to_string()],
            priority: Some("High".to_string()),
            reporter: None,
            assignee: None,
            raw: serde_json::json!({}),
        };
        let messages = build_generation_messages(&event);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("PRESS-100"));
        assert!(messages[1].content.contains("Add CSV export"));
        assert!(messages[1].content.contains("Priority: High"));
    }

    #[test]
    fn unit_regeneration_messages_include_only_resolved_stories() {
        let related = vec![IssueSnapshot {
            key: "PRESS-1".to_string(),
            summary: "Faster dashboards".to_string(),
            description: String::new(),
            status_name: None,
        }];
        let messages =
            build_regeneration_messages("PRESS-100", "Title", "Description", &related);
        assert!(messages[1].content.contains("PRESS-1: Faster dashboards"));
        assert!(!messages[1].content.contains("INVALID"));
    }
}
