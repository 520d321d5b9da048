use std::net::SocketAddr;
use std::sync::Arc;

use httpmock::prelude::*;
use press_ai::{LlmClient, OpenAiClient, OpenAiConfig};
use press_gateway::{build_gateway_router, GatewayConfig, GatewayState};
use press_generator::{DraftGenerator, GeneratorConfig, ProviderSlot};
use press_notify::{ChatNotifier, ChatNotifierConfig, TemplateStore};
use press_store::{ChangelogStore, SqliteChangelogStore};
use press_tracker::{EventFilter, HttpTrackerClient, HttpTrackerConfig, TrackerClient};
use serde_json::{json, Value};

struct TestStack {
    addr: SocketAddr,
    provider: MockServer,
    tracker: MockServer,
    chat: MockServer,
    _tempdir: tempfile::TempDir,
}

impl TestStack {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

fn completion_body(draft: Value) -> Value {
    json!({
        "choices": [
            {
                "message": { "content": draft.to_string() },
                "finish_reason": "stop"
            }
        ],
        "usage": { "prompt_tokens": 120, "completion_tokens": 80, "total_tokens": 200 }
    })
}

fn sample_draft(title: &str) -> Value {
    json!({
        "customer_title": title,
        "customer_description": "You can now export any report as a CSV file.",
        "highlights": ["Export any report", "Scheduled exports"],
        "category": "feature",
        "breaking_changes": false
    })
}

fn webhook_body(issue_key: &str, labels: &[&str]) -> Value {
    json!({
        "webhookEvent": "jira:issue_updated",
        "issue": {
            "key": issue_key,
            "fields": {
                "summary": "Add CSV export to reports",
                "description": "Customers asked for raw data exports.",
                "status": { "name": "Done", "statusCategory": { "key": "done" } },
                "labels": labels,
            }
        }
    })
}

async fn spawn_stack() -> TestStack {
    let provider = MockServer::start_async().await;
    let tracker = MockServer::start_async().await;
    let chat = MockServer::start_async().await;
    let tempdir = tempfile::tempdir().expect("tempdir");

    let llm: Arc<dyn LlmClient> = Arc::new(
        OpenAiClient::new(OpenAiConfig {
            api_base: provider.base_url(),
            api_key: "test-key".to_string(),
            request_timeout_ms: 2_000,
            max_retries: 0,
            retry_budget_ms: 0,
        })
        .expect("provider client"),
    );
    let tracker_client: Arc<dyn TrackerClient> = Arc::new(
        HttpTrackerClient::new(HttpTrackerConfig {
            api_base: tracker.base_url(),
            api_token: "tracker-token".to_string(),
            request_timeout_ms: 2_000,
        })
        .expect("tracker client"),
    );
    let generator = DraftGenerator::new(
        ProviderSlot {
            client: llm,
            name: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
        },
        None,
        tracker_client.clone(),
        GeneratorConfig {
            attempt_timeout_ms: 2_000,
            total_deadline_ms: 5_000,
            ..GeneratorConfig::default()
        },
    );
    let notifier = ChatNotifier::new(ChatNotifierConfig {
        webhook_url: format!("{}/hooks/chat", chat.base_url()),
        request_timeout_ms: 2_000,
        retry_max_attempts: 1,
        retry_base_delay_ms: 1,
    })
    .expect("notifier");
    let templates = TemplateStore::load(tempdir.path().join("templates.json"), "#releases")
        .expect("template store");
    let store: Arc<dyn ChangelogStore> = Arc::new(
        SqliteChangelogStore::new(tempdir.path().join("changelog.sqlite")).expect("sqlite store"),
    );

    let state = Arc::new(GatewayState {
        config: GatewayConfig {
            bind: "127.0.0.1:0".to_string(),
            event_filter: EventFilter::default(),
            sync_back_field_id: "customfield_20100".to_string(),
            public_base_url: "https://changelog.example".to_string(),
        },
        store,
        generator: Arc::new(generator),
        tracker: tracker_client,
        notifier,
        templates: Arc::new(templates),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = build_gateway_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    TestStack {
        addr,
        provider,
        tracker,
        chat,
        _tempdir: tempdir,
    }
}

#[tokio::test]
async fn integration_webhook_to_published_entry_roundtrip() {
    let stack = spawn_stack().await;
    let http = reqwest::Client::new();

    let provider_mock = stack
        .provider
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .json_body(completion_body(sample_draft("Export reports as CSV")));
        })
        .await;
    let chat_mock = stack
        .chat
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/chat");
            then.status(200).body("ok");
        })
        .await;
    let sync_mock = stack
        .tracker
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/rest/api/2/issue/PRESS-100")
                .json_body_includes(
                    json!({ "fields": { "customfield_20100": "You can now export any report as a CSV file." } })
                        .to_string(),
                );
            then.status(204);
        })
        .await;

    // Webhook delivery creates a pending entry and notifies the reviewers.
    let created: Value = http
        .post(stack.url("/webhooks/tracker"))
        .body(webhook_body("PRESS-100", &["customer-impact"]).to_string())
        .send()
        .await
        .expect("webhook request")
        .json()
        .await
        .expect("webhook json");
    assert_eq!(created["success"], json!(true));
    assert_eq!(created["changelogCreated"], json!(true));
    provider_mock.assert_async().await;
    chat_mock.assert_async().await;

    // Redelivery of the same issue is acknowledged without a second entry.
    let redelivered: Value = http
        .post(stack.url("/webhooks/tracker"))
        .body(webhook_body("PRESS-100", &["customer-impact"]).to_string())
        .send()
        .await
        .expect("redelivery request")
        .json()
        .await
        .expect("redelivery json");
    assert_eq!(redelivered["changelogCreated"], json!(false));

    let entries: Vec<Value> = http
        .get(stack.url("/entries?status=pending_review"))
        .send()
        .await
        .expect("list request")
        .json()
        .await
        .expect("list json");
    assert_eq!(entries.len(), 1);
    let entry_id = entries[0]["id"].as_str().expect("entry id").to_string();
    assert_eq!(entries[0]["issue_key"], json!("PRESS-100"));
    assert_eq!(entries[0]["customer_title"], json!("Export reports as CSV"));

    // Approval freezes content and syncs the summary back to the tracker.
    let approved: Value = http
        .put(stack.url(&format!("/entries/{entry_id}/approval")))
        .json(&json!({
            "approval_status": "approved",
            "customer_facing_title": "Polished CSV export",
            "public_visibility": true
        }))
        .send()
        .await
        .expect("approval request")
        .json()
        .await
        .expect("approval json");
    assert_eq!(approved["approval_status"], json!("approved"));
    assert_eq!(approved["customer_title"], json!("Polished CSV export"));
    assert!(approved["approved_at"].is_string());
    sync_mock.assert_async().await;

    let published: Value = http
        .post(stack.url(&format!("/entries/{entry_id}/publish")))
        .send()
        .await
        .expect("publish request")
        .json()
        .await
        .expect("publish json");
    assert_eq!(published["approval_status"], json!("published"));
    assert_eq!(published["public_changelog_visible"], json!(true));

    let status: Value = http
        .get(stack.url("/status"))
        .send()
        .await
        .expect("status request")
        .json()
        .await
        .expect("status json");
    assert_eq!(status["status"], json!("ok"));
    assert_eq!(status["entries"], json!(1));
}

#[tokio::test]
async fn integration_provider_outage_degrades_to_placeholder_entry() {
    let stack = spawn_stack().await;
    let http = reqwest::Client::new();

    stack
        .provider
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(500).body("upstream unavailable");
        })
        .await;
    stack
        .chat
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/chat");
            then.status(200).body("ok");
        })
        .await;

    let created: Value = http
        .post(stack.url("/webhooks/tracker"))
        .body(webhook_body("PRESS-200", &["customer-impact"]).to_string())
        .send()
        .await
        .expect("webhook request")
        .json()
        .await
        .expect("webhook json");
    assert_eq!(created["success"], json!(true));
    assert_eq!(created["changelogCreated"], json!(true));

    let entries: Vec<Value> = http
        .get(stack.url("/entries?issue_key=PRESS-200"))
        .send()
        .await
        .expect("list request")
        .json()
        .await
        .expect("list json");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["approval_status"], json!("pending_review"));
    assert_eq!(entries[0]["customer_title"], json!("Add CSV export to reports"));
    assert_eq!(
        entries[0]["generation_metadata"]["manual_review_required"],
        json!(true)
    );
    assert!(entries[0]["generation_metadata"]["provider"].is_null());
    assert_eq!(entries[0]["quality_score"], json!(0.0));
}

#[tokio::test]
async fn integration_regeneration_reports_unresolvable_related_stories() {
    let stack = spawn_stack().await;
    let http = reqwest::Client::new();

    stack
        .provider
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .json_body(completion_body(sample_draft("Export and schedule CSV reports")));
        })
        .await;
    stack
        .chat
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/chat");
            then.status(200).body("ok");
        })
        .await;
    stack
        .tracker
        .mock_async(|when, then| {
            when.method(GET).path("/rest/api/2/issue/PRESS-1");
            then.status(200).json_body(json!({
                "key": "PRESS-1",
                "fields": {
                    "summary": "Report scheduling",
                    "description": "Scheduled report runs.",
                    "status": { "name": "Done" }
                }
            }));
        })
        .await;
    stack
        .tracker
        .mock_async(|when, then| {
            when.method(GET).path("/rest/api/2/issue/INVALID-9");
            then.status(404).body("no such issue");
        })
        .await;

    let created: Value = http
        .post(stack.url("/webhooks/tracker"))
        .body(webhook_body("PRESS-100", &["customer-impact"]).to_string())
        .send()
        .await
        .expect("webhook request")
        .json()
        .await
        .expect("webhook json");
    assert_eq!(created["changelogCreated"], json!(true));

    let entries: Vec<Value> = http
        .get(stack.url("/entries?issue_key=PRESS-100"))
        .send()
        .await
        .expect("list request")
        .json()
        .await
        .expect("list json");
    let entry_id = entries[0]["id"].as_str().expect("entry id").to_string();

    let regenerated: Value = http
        .post(stack.url(&format!("/entries/{entry_id}/regenerate")))
        .json(&json!({ "relatedStories": ["PRESS-1", "INVALID-9"] }))
        .send()
        .await
        .expect("regenerate request")
        .json()
        .await
        .expect("regenerate json");
    assert_eq!(regenerated["success"], json!(true));
    assert_eq!(regenerated["relatedStoriesRequested"], json!(2));
    assert_eq!(regenerated["relatedStoriesProcessed"], json!(1));
    assert_eq!(regenerated["failedStories"], json!(["INVALID-9"]));
    assert_eq!(
        regenerated["enhancedContent"]["customer_title"],
        json!("Export and schedule CSV reports")
    );
}

#[tokio::test]
async fn integration_notification_outage_does_not_block_entry_creation() {
    let stack = spawn_stack().await;
    let http = reqwest::Client::new();

    stack
        .provider
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .json_body(completion_body(sample_draft("Export reports as CSV")));
        })
        .await;
    stack
        .chat
        .mock_async(|when, then| {
            when.method(POST).path("/hooks/chat");
            then.status(500).body("chat is down");
        })
        .await;

    let created = http
        .post(stack.url("/webhooks/tracker"))
        .body(webhook_body("PRESS-300", &["customer-impact"]).to_string())
        .send()
        .await
        .expect("webhook request");
    assert_eq!(created.status().as_u16(), 200);
    let body: Value = created.json().await.expect("webhook json");
    assert_eq!(body["changelogCreated"], json!(true));

    let entries: Vec<Value> = http
        .get(stack.url("/entries?issue_key=PRESS-300"))
        .send()
        .await
        .expect("list request")
        .json()
        .await
        .expect("list json");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["approval_status"], json!("pending_review"));
}

#[tokio::test]
async fn integration_malformed_and_filtered_webhooks() {
    let stack = spawn_stack().await;
    let http = reqwest::Client::new();

    let malformed = http
        .post(stack.url("/webhooks/tracker"))
        .body("{\"issue\": {}}")
        .send()
        .await
        .expect("malformed request");
    assert_eq!(malformed.status().as_u16(), 400);
    let body: Value = malformed.json().await.expect("error json");
    assert_eq!(body["error"], json!("invalid_payload"));

    // A done issue without the customer-impact label is acknowledged but skipped.
    let skipped: Value = http
        .post(stack.url("/webhooks/tracker"))
        .body(webhook_body("PRESS-400", &["internal-only"]).to_string())
        .send()
        .await
        .expect("skip request")
        .json()
        .await
        .expect("skip json");
    assert_eq!(skipped["success"], json!(true));
    assert_eq!(skipped["changelogCreated"], json!(false));

    let entries: Vec<Value> = http
        .get(stack.url("/entries"))
        .send()
        .await
        .expect("list request")
        .json()
        .await
        .expect("list json");
    assert!(entries.is_empty());
}
