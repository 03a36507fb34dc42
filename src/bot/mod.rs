pub mod actions;
pub mod cards;
pub mod draft;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod history;
pub mod llm;
pub mod normalize;
pub mod orchestrator;
pub mod protocol;
pub mod reminder;
pub mod sanitizer;
pub mod server;
pub mod slot_filling;
pub mod tool_registry;
pub mod tools;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::shared::config::BotConfig;
use crate::shared::{MemoryTaskStore, MySqlTaskStore, TaskStore};
use gateway::{MessagingGateway, SlackGateway};
use handler::MessageHandler;
use history::ConversationStore;
use llm::{ChatModel, OpenAiClient};
use orchestrator::Orchestrator;
use reminder::{ReminderCopywriter, ReminderScheduler};
use server::{create_router, AppState};
use slot_filling::{LiteralExtractor, LlmTaskExtractor, PendingStore, SlotFillingEngine, TaskExtractor};
use tool_registry::ToolRegistry;

pub async fn run(config: BotConfig) -> Result<()> {
    info!("Starting taskpilot bot...");

    let store: Arc<dyn TaskStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to MySQL database...");
            let store = MySqlTaskStore::connect(url)
                .await
                .context("Database not available. Please check DATABASE_URL")?;
            info!("Connected to database successfully!");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, tasks are kept in memory and lost on restart");
            Arc::new(MemoryTaskStore::new())
        }
    };

    let slack = SlackGateway::new(reqwest::Client::new(), config.slack_bot_token.clone());
    let bot_user_id = match &config.slack_bot_user_id {
        Some(id) => Some(id.clone()),
        None => match slack.auth_test().await {
            Ok(id) => {
                info!("Resolved bot user id: {}", id);
                Some(id)
            }
            Err(e) => {
                error!("auth.test failed, bot mentions will not be stripped: {}", e);
                None
            }
        },
    };
    let gateway: Arc<dyn MessagingGateway> = Arc::new(slack);

    let model: Option<Arc<dyn ChatModel>> = match &config.model {
        Some(model_config) => {
            info!("Using chat model {} at {}", model_config.model, model_config.base_url);
            Some(Arc::new(OpenAiClient::new(model_config)?))
        }
        None => {
            warn!("OPENAI_API_KEY not set, running with literal extraction only");
            None
        }
    };

    let registry = Arc::new(ToolRegistry::new());
    tools::register_core_tools(&registry).await;

    let extractor: Arc<dyn TaskExtractor> = match &model {
        Some(model) => Arc::new(LlmTaskExtractor::new(model.clone())),
        None => Arc::new(LiteralExtractor),
    };
    let slot_filling = SlotFillingEngine::new(
        extractor,
        store.clone(),
        Arc::new(PendingStore::new(config.pending_ttl)),
        bot_user_id.clone(),
    );
    let orchestrator = model
        .clone()
        .map(|model| Orchestrator::new(model, registry.clone()));

    let handler = Arc::new(MessageHandler::new(
        gateway.clone(),
        store.clone(),
        slot_filling,
        orchestrator,
        ConversationStore::new(config.history_limit),
        bot_user_id.clone(),
    ));

    let scheduler = Arc::new(ReminderScheduler::new(
        store,
        gateway,
        ReminderCopywriter::new(model),
        config.reminder.clone(),
    ));
    let scheduler_task = tokio::spawn(scheduler.run());

    let app = create_router(Arc::new(AppState {
        handler,
        signing_secret: config.slack_signing_secret.clone(),
        bot_user_id,
    }));

    let bind_addr = format!("0.0.0.0:{}", config.port);
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Ready to accept Slack events on /slack/events and /slack/actions");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler_task.abort();
    info!("Shutting down taskpilot bot...");
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
