use std::time::Duration;

use anyhow::{anyhow, Result};

/// Upper bound for every configured interval.
const MAX_INTERVAL_SECS: i64 = 365 * 24 * 60 * 60;

/// Raw settings as read from flags / environment. Validated into [`BotConfig`].
#[derive(Debug, Clone, clap::Args)]
pub struct BotSettings {
    /// Slack bot token (xoxb-...)
    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    pub slack_bot_token: String,

    /// Slack request signing secret
    #[arg(long, env = "SLACK_SIGNING_SECRET", hide_env_values = true)]
    pub slack_signing_secret: String,

    /// Bot user id; resolved with auth.test when omitted
    #[arg(long, env = "SLACK_BOT_USER_ID")]
    pub slack_bot_user_id: Option<String>,

    /// Chat model API key; without it extraction is literal-only and reminder copy uses a template
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,

    /// HTTP listen port
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// MySQL connection URL; tasks are kept in memory when omitted
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "TASKPILOT_LOG_DIR", default_value = "/app/logs")]
    pub log_dir: String,

    /// Messages kept per conversation thread
    #[arg(long, env = "TASKPILOT_HISTORY_LIMIT", default_value_t = 20)]
    pub history_limit: usize,

    /// Minutes an unanswered follow-up question stays open (0 = forever)
    #[arg(long, env = "TASKPILOT_PENDING_TTL_MINS", default_value_t = 30)]
    pub pending_ttl_mins: u64,

    #[arg(long, env = "TASKPILOT_REMINDER_TICK_SECS", default_value_t = 60)]
    pub reminder_tick_secs: u64,

    #[arg(long, env = "TASKPILOT_REMINDER_LOOKAHEAD_HOURS", default_value_t = 168)]
    pub reminder_lookahead_hours: u64,

    #[arg(long, env = "TASKPILOT_REMINDER_TOLERANCE_SECS", default_value_t = 60)]
    pub reminder_tolerance_secs: u64,

    #[arg(long, env = "TASKPILOT_REMINDER_CATCH_UP_SECS", default_value_t = 600)]
    pub reminder_catch_up_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ReminderConfig {
    pub tick: Duration,
    pub lookahead: chrono::Duration,
    pub tolerance: chrono::Duration,
    pub catch_up: chrono::Duration,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            lookahead: chrono::Duration::days(7),
            tolerance: chrono::Duration::seconds(60),
            catch_up: chrono::Duration::minutes(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub slack_bot_token: String,
    pub slack_signing_secret: String,
    pub slack_bot_user_id: Option<String>,
    pub model: Option<ModelConfig>,
    pub port: u16,
    pub database_url: Option<String>,
    pub log_dir: String,
    pub history_limit: usize,
    pub pending_ttl: Option<chrono::Duration>,
    pub reminder: ReminderConfig,
}

impl BotConfig {
    pub fn from_settings(settings: BotSettings) -> Result<Self> {
        let slack_bot_token = required(&settings.slack_bot_token, "SLACK_BOT_TOKEN")?;
        let slack_signing_secret =
            required(&settings.slack_signing_secret, "SLACK_SIGNING_SECRET")?;

        let model = optional(settings.openai_api_key.as_deref()).map(|api_key| ModelConfig {
            api_key,
            base_url: settings.openai_base_url.trim().trim_end_matches('/').to_string(),
            model: settings.openai_model.trim().to_string(),
        });
        if let Some(model) = &model {
            if model.base_url.is_empty() || model.model.is_empty() {
                return Err(anyhow!(
                    "OPENAI_BASE_URL and OPENAI_MODEL must not be empty when OPENAI_API_KEY is set"
                ));
            }
        }

        if settings.history_limit == 0 {
            return Err(anyhow!("TASKPILOT_HISTORY_LIMIT must be at least 1"));
        }
        if settings.reminder_tick_secs == 0 {
            return Err(anyhow!("TASKPILOT_REMINDER_TICK_SECS must be at least 1"));
        }
        if settings.reminder_lookahead_hours == 0 {
            return Err(anyhow!("TASKPILOT_REMINDER_LOOKAHEAD_HOURS must be at least 1"));
        }

        let pending_ttl = interval(settings.pending_ttl_mins, 60, "TASKPILOT_PENDING_TTL_MINS")?;
        let tick = interval(settings.reminder_tick_secs, 1, "TASKPILOT_REMINDER_TICK_SECS")?;
        let lookahead = interval(
            settings.reminder_lookahead_hours,
            60 * 60,
            "TASKPILOT_REMINDER_LOOKAHEAD_HOURS",
        )?;
        let tolerance = interval(
            settings.reminder_tolerance_secs,
            1,
            "TASKPILOT_REMINDER_TOLERANCE_SECS",
        )?;
        let catch_up = interval(
            settings.reminder_catch_up_secs,
            1,
            "TASKPILOT_REMINDER_CATCH_UP_SECS",
        )?;

        let log_dir = settings.log_dir.trim().trim_end_matches('/').to_string();

        Ok(Self {
            slack_bot_token,
            slack_signing_secret,
            slack_bot_user_id: optional(settings.slack_bot_user_id.as_deref()),
            model,
            port: settings.port,
            database_url: optional(settings.database_url.as_deref()),
            log_dir: if log_dir.is_empty() {
                "/app/logs".to_string()
            } else {
                log_dir
            },
            history_limit: settings.history_limit,
            pending_ttl: (pending_ttl > chrono::Duration::zero()).then_some(pending_ttl),
            reminder: ReminderConfig {
                tick: tick.to_std()?,
                lookahead,
                tolerance,
                catch_up,
            },
        })
    }
}

fn required(value: &str, name: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(anyhow!("{} must not be empty", name));
    }
    Ok(value.to_string())
}

/// `value` units of `unit_secs` seconds each, bounded by [`MAX_INTERVAL_SECS`].
fn interval(value: u64, unit_secs: i64, name: &str) -> Result<chrono::Duration> {
    i64::try_from(value)
        .ok()
        .and_then(|v| v.checked_mul(unit_secs))
        .filter(|secs| *secs <= MAX_INTERVAL_SECS)
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| anyhow!("{} is out of range (at most 365 days)", name))
}

fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BotSettings {
        BotSettings {
            slack_bot_token: " xoxb-test ".to_string(),
            slack_signing_secret: "secret".to_string(),
            slack_bot_user_id: Some("  ".to_string()),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1/".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            port: 3000,
            database_url: None,
            log_dir: "/tmp/taskpilot/".to_string(),
            history_limit: 20,
            pending_ttl_mins: 30,
            reminder_tick_secs: 60,
            reminder_lookahead_hours: 168,
            reminder_tolerance_secs: 60,
            reminder_catch_up_secs: 600,
        }
    }

    #[test]
    fn test_settings_are_trimmed_and_defaulted() {
        let config = BotConfig::from_settings(settings()).unwrap();
        assert_eq!(config.slack_bot_token, "xoxb-test");
        assert_eq!(config.slack_bot_user_id, None);
        assert!(config.model.is_none());
        assert_eq!(config.log_dir, "/tmp/taskpilot");
        assert_eq!(config.pending_ttl, Some(chrono::Duration::minutes(30)));
        assert_eq!(config.reminder.lookahead, chrono::Duration::days(7));
    }

    #[test]
    fn test_model_config_requires_key() {
        let mut raw = settings();
        raw.openai_api_key = Some("sk-test".to_string());
        let config = BotConfig::from_settings(raw).unwrap();
        let model = config.model.unwrap();
        assert_eq!(model.base_url, "https://api.openai.com/v1");
        assert_eq!(model.api_key, "sk-test");
    }

    #[test]
    fn test_rejects_empty_secret_and_zero_tick() {
        let mut raw = settings();
        raw.slack_signing_secret = "   ".to_string();
        assert!(BotConfig::from_settings(raw).is_err());

        let mut raw = settings();
        raw.reminder_tick_secs = 0;
        assert!(BotConfig::from_settings(raw).is_err());
    }

    #[test]
    fn test_zero_ttl_disables_expiry() {
        let mut raw = settings();
        raw.pending_ttl_mins = 0;
        let config = BotConfig::from_settings(raw).unwrap();
        assert!(config.pending_ttl.is_none());
    }

    #[test]
    fn test_oversized_intervals_are_rejected() {
        let mut raw = settings();
        raw.pending_ttl_mins = u64::MAX;
        let err = BotConfig::from_settings(raw).unwrap_err();
        assert!(err.to_string().contains("TASKPILOT_PENDING_TTL_MINS"));

        let mut raw = settings();
        raw.reminder_catch_up_secs = i64::MAX as u64 + 1;
        assert!(BotConfig::from_settings(raw).is_err());

        let mut raw = settings();
        raw.reminder_lookahead_hours = 365 * 24 + 1;
        assert!(BotConfig::from_settings(raw).is_err());

        let mut raw = settings();
        raw.reminder_lookahead_hours = 365 * 24;
        let config = BotConfig::from_settings(raw).unwrap();
        assert_eq!(config.reminder.lookahead, chrono::Duration::days(365));
        assert_eq!(config.reminder.tick, Duration::from_secs(60));
    }
}
