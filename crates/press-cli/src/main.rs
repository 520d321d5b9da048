//! Pressline server binary: flag parsing, component wiring, and startup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use press_ai::{AnthropicClient, AnthropicConfig, LlmClient, OpenAiClient, OpenAiConfig};
use press_gateway::{run_gateway_server, GatewayConfig, GatewayState};
use press_generator::{DraftGenerator, GeneratorConfig, ProviderSlot};
use press_notify::{ChatNotifier, ChatNotifierConfig, TemplateStore};
use press_store::{ChangelogStore, MemoryChangelogStore, SqliteChangelogStore};
use press_tracker::{EventFilter, HttpTrackerClient, HttpTrackerConfig, TrackerClient};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "pressline",
    about = "Changelog generation and approval gateway",
    version
)]
/// Public struct `Cli` used across Pressline components.
pub struct Cli {
    #[arg(
        long,
        env = "PRESSLINE_BIND",
        default_value = "127.0.0.1:8085",
        help = "Address the gateway HTTP listener binds to"
    )]
    pub bind: String,

    #[arg(
        long,
        env = "PRESSLINE_DATABASE",
        default_value = ".pressline/changelog.sqlite",
        help = "SQLite database path for changelog entries"
    )]
    pub database: PathBuf,

    #[arg(
        long = "memory-store",
        env = "PRESSLINE_MEMORY_STORE",
        default_value_t = false,
        help = "Use the in-memory entry store instead of SQLite (state is lost on exit)"
    )]
    pub memory_store: bool,

    #[arg(
        long = "template-store",
        env = "PRESSLINE_TEMPLATE_STORE",
        default_value = ".pressline/templates.json",
        help = "JSON file holding chat message templates"
    )]
    pub template_store: PathBuf,

    #[arg(
        long = "primary-provider",
        env = "PRESSLINE_PRIMARY_PROVIDER",
        default_value = "openai",
        help = "Primary generation provider: openai or anthropic"
    )]
    pub primary_provider: String,

    #[arg(
        long = "primary-model",
        env = "PRESSLINE_PRIMARY_MODEL",
        default_value = "gpt-4o-mini",
        help = "Model used for primary generation attempts"
    )]
    pub primary_model: String,

    #[arg(
        long = "fallback-provider",
        env = "PRESSLINE_FALLBACK_PROVIDER",
        help = "Optional fallback provider tried after primary attempts fail"
    )]
    pub fallback_provider: Option<String>,

    #[arg(
        long = "fallback-model",
        env = "PRESSLINE_FALLBACK_MODEL",
        help = "Model used for the fallback provider"
    )]
    pub fallback_model: Option<String>,

    #[arg(
        long = "openai-api-base",
        env = "PRESSLINE_OPENAI_API_BASE",
        default_value = "https://api.openai.com/v1",
        help = "Base URL for the OpenAI-compatible API"
    )]
    pub openai_api_base: String,

    #[arg(
        long = "openai-api-key",
        env = "OPENAI_API_KEY",
        hide_env_values = true,
        help = "API key for the OpenAI-compatible API"
    )]
    pub openai_api_key: Option<String>,

    #[arg(
        long = "anthropic-api-base",
        env = "PRESSLINE_ANTHROPIC_API_BASE",
        default_value = "https://api.anthropic.com/v1",
        help = "Base URL for the Anthropic Messages API"
    )]
    pub anthropic_api_base: String,

    #[arg(
        long = "anthropic-api-key",
        env = "ANTHROPIC_API_KEY",
        hide_env_values = true,
        help = "API key for the Anthropic Messages API"
    )]
    pub anthropic_api_key: Option<String>,

    #[arg(
        long = "generation-attempt-timeout-ms",
        env = "PRESSLINE_GENERATION_ATTEMPT_TIMEOUT_MS",
        default_value_t = 30_000,
        help = "Per-attempt provider timeout in milliseconds"
    )]
    pub generation_attempt_timeout_ms: u64,

    #[arg(
        long = "generation-deadline-ms",
        env = "PRESSLINE_GENERATION_DEADLINE_MS",
        default_value_t = 60_000,
        help = "Total generation deadline across all provider attempts"
    )]
    pub generation_deadline_ms: u64,

    #[arg(
        long = "tracker-api-base",
        env = "PRESSLINE_TRACKER_API_BASE",
        default_value = "",
        help = "Issue tracker REST base URL; empty disables related-story lookup and sync-back"
    )]
    pub tracker_api_base: String,

    #[arg(
        long = "tracker-api-token",
        env = "PRESSLINE_TRACKER_API_TOKEN",
        hide_env_values = true,
        default_value = "",
        help = "Bearer token for the issue tracker REST API"
    )]
    pub tracker_api_token: String,

    #[arg(
        long = "sync-back-field-id",
        env = "PRESSLINE_SYNC_BACK_FIELD_ID",
        default_value = "",
        help = "Tracker custom-field id receiving the approved summary; empty disables sync-back"
    )]
    pub sync_back_field_id: String,

    #[arg(
        long = "customer-impact-label",
        env = "PRESSLINE_CUSTOMER_IMPACT_LABEL",
        default_value = "customer-impact",
        help = "Label an issue must carry to enter the changelog pipeline"
    )]
    pub customer_impact_label: String,

    #[arg(
        long = "done-category",
        env = "PRESSLINE_DONE_CATEGORY",
        default_value = "done",
        help = "Status category key an issue must reach to enter the pipeline"
    )]
    pub done_category: String,

    #[arg(
        long = "chat-webhook-url",
        env = "PRESSLINE_CHAT_WEBHOOK_URL",
        hide_env_values = true,
        default_value = "",
        help = "Chat incoming-webhook URL for review notifications; empty disables delivery"
    )]
    pub chat_webhook_url: String,

    #[arg(
        long = "chat-channel",
        env = "PRESSLINE_CHAT_CHANNEL",
        default_value = "#releases",
        help = "Default chat channel for seeded templates"
    )]
    pub chat_channel: String,

    #[arg(
        long = "public-base-url",
        env = "PRESSLINE_PUBLIC_BASE_URL",
        default_value = "",
        help = "Base URL used when rendering entry links in notifications"
    )]
    pub public_base_url: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
/// Enumerates supported `Command` values.
pub enum Command {
    /// Run the gateway server (the default when no subcommand is given).
    Serve,
    /// Render a message template locally without sending it.
    RenderTemplate {
        #[arg(long, help = "Template name from the template store")]
        name: Option<String>,
        #[arg(long, help = "Literal template text; takes precedence over --name")]
        text: Option<String>,
        #[arg(long, default_value = "Sample changelog title")]
        content_title: String,
        #[arg(long, default_value = "feature")]
        content_type: String,
        #[arg(long, default_value_t = 0.85)]
        quality_score: f64,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn build_provider_slot(cli: &Cli, provider: &str, model: &str) -> Result<ProviderSlot> {
    let client: Arc<dyn LlmClient> = match provider {
        "openai" => {
            let api_key = cli
                .openai_api_key
                .clone()
                .context("--openai-api-key (or OPENAI_API_KEY) is required for the openai provider")?;
            Arc::new(OpenAiClient::new(OpenAiConfig {
                api_base: cli.openai_api_base.clone(),
                api_key,
                request_timeout_ms: cli.generation_attempt_timeout_ms,
                max_retries: 2,
                retry_budget_ms: cli.generation_attempt_timeout_ms,
            })?)
        }
        "anthropic" => {
            let api_key = cli.anthropic_api_key.clone().context(
                "--anthropic-api-key (or ANTHROPIC_API_KEY) is required for the anthropic provider",
            )?;
            Arc::new(AnthropicClient::new(AnthropicConfig {
                api_base: cli.anthropic_api_base.clone(),
                api_key,
                request_timeout_ms: cli.generation_attempt_timeout_ms,
                max_retries: 2,
                retry_budget_ms: cli.generation_attempt_timeout_ms,
            })?)
        }
        other => bail!("unsupported provider '{other}'; expected openai or anthropic"),
    };
    Ok(ProviderSlot {
        client,
        name: provider.to_string(),
        model: model.to_string(),
    })
}

fn build_state(cli: Cli) -> Result<Arc<GatewayState>> {
    let store: Arc<dyn ChangelogStore> = if cli.memory_store {
        info!("using in-memory entry store");
        Arc::new(MemoryChangelogStore::new())
    } else {
        info!(path = %cli.database.display(), "opening SQLite entry store");
        Arc::new(SqliteChangelogStore::new(&cli.database)?)
    };

    let primary = build_provider_slot(&cli, cli.primary_provider.trim(), &cli.primary_model)?;
    let fallback = match (&cli.fallback_provider, &cli.fallback_model) {
        (Some(provider), Some(model)) => Some(build_provider_slot(&cli, provider.trim(), model)?),
        (Some(_), None) | (None, Some(_)) => {
            bail!("--fallback-provider and --fallback-model must be set together")
        }
        (None, None) => None,
    };

    let tracker: Arc<dyn TrackerClient> = Arc::new(HttpTrackerClient::new(HttpTrackerConfig {
        api_base: cli.tracker_api_base.clone(),
        api_token: cli.tracker_api_token.clone(),
        request_timeout_ms: 10_000,
    })?);

    let generator = DraftGenerator::new(
        primary,
        fallback,
        tracker.clone(),
        GeneratorConfig {
            attempt_timeout_ms: cli.generation_attempt_timeout_ms,
            total_deadline_ms: cli.generation_deadline_ms,
            ..GeneratorConfig::default()
        },
    );

    let notifier = ChatNotifier::new(ChatNotifierConfig {
        webhook_url: cli.chat_webhook_url.clone(),
        request_timeout_ms: 10_000,
        retry_max_attempts: 3,
        retry_base_delay_ms: 500,
    })?;
    if !notifier.is_configured() {
        info!("chat webhook not configured; review notifications are disabled");
    }

    let templates = TemplateStore::load(cli.template_store.clone(), &cli.chat_channel)
        .context("failed to load template store")?;

    Ok(Arc::new(GatewayState {
        config: GatewayConfig {
            bind: cli.bind.clone(),
            event_filter: EventFilter {
                customer_impact_label: cli.customer_impact_label.clone(),
                done_category: cli.done_category.clone(),
            },
            sync_back_field_id: cli.sync_back_field_id.clone(),
            public_base_url: cli.public_base_url.clone(),
        },
        store,
        generator: Arc::new(generator),
        tracker,
        notifier,
        templates: Arc::new(templates),
    }))
}

fn render_template_preview(
    cli: &Cli,
    name: Option<&str>,
    text: Option<&str>,
    context: &press_notify::TemplateContext,
) -> Result<String> {
    let template_text = match text {
        Some(text) => text.to_string(),
        None => {
            let store = TemplateStore::load(cli.template_store.clone(), &cli.chat_channel)
                .context("failed to load template store")?;
            let name = name.unwrap_or(press_notify::DEFAULT_TEMPLATE_NAME);
            store
                .get(name)
                .with_context(|| format!("template '{name}' not found"))?
                .template
        }
    };
    Ok(press_notify::render_template(&template_text, context))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        None | Some(Command::Serve) => {
            let state = build_state(cli)?;
            run_gateway_server(state).await
        }
        Some(Command::RenderTemplate {
            ref name,
            ref text,
            ref content_title,
            ref content_type,
            quality_score,
        }) => {
            let context = press_notify::TemplateContext {
                content_title: content_title.clone(),
                content_type: content_type.clone(),
                quality_score,
                content_url: cli.public_base_url.clone(),
                created_date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            };
            let rendered =
                render_template_preview(&cli, name.as_deref(), text.as_deref(), &context)?;
            println!("{rendered}");
            Ok(())
        }
    }
}
