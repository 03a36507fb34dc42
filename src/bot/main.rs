use anyhow::Result;
use clap::Parser;

#[path = "../bot/mod.rs"]
mod bot;
#[path = "../shared/mod.rs"]
mod shared;

#[derive(Parser)]
#[command(name = "taskpilot-bot")]
#[command(about = "Taskpilot - Slack task tracking assistant")]
struct Cli {
    #[command(flatten)]
    settings: shared::config::BotSettings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = shared::config::BotConfig::from_settings(cli.settings)?;

    // Initialize service logging
    let _logging = shared::logging::init_service_logging(&config.log_dir, "taskpilot_bot")?;

    bot::run(config).await
}
