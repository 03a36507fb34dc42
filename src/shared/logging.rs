use tracing::info;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking writers flushing until the process exits.
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

/// Initialize logging for a service (rolling file + console).
///
/// Falls back to console-only output when `log_dir` is not writable, so the bot
/// still starts inside read-only containers.
pub fn init_service_logging(log_dir: &str, service_name: &str) -> anyhow::Result<LoggingGuard> {
    // RUST_LOG overrides the default level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (stdout_writer, stdout_guard) = non_blocking(std::io::stdout());
    if !can_write_logs(log_dir) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer(stdout_writer))
            .try_init()?;

        info!("Logging initialized - console output only (could not write to {log_dir})");
        return Ok(LoggingGuard {
            _guards: vec![stdout_guard],
        });
    }

    let (file_writer, file_guard) = non_blocking(file_appender(log_dir, service_name));
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer(stdout_writer))
        .try_init()?;

    info!("Logging initialized - logs will be written to {log_dir}/{service_name}.log.<date>");
    Ok(LoggingGuard {
        _guards: vec![file_guard, stdout_guard],
    })
}

fn console_layer<S>(
    writer: non_blocking::NonBlocking,
) -> fmt::Layer<S, fmt::format::DefaultFields, fmt::format::Format, non_blocking::NonBlocking> {
    fmt::layer()
        .with_writer(writer)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
}

/// Rotates at midnight UTC into `{service_name}.log.YYYY-MM-DD`.
fn file_appender(log_dir: &str, service_name: &str) -> RollingFileAppender {
    tracing_appender::rolling::daily(log_dir, format!("{service_name}.log"))
}

fn can_write_logs(log_dir: &str) -> bool {
    let marker = format!("{log_dir}/.test_write");
    std::fs::create_dir_all(log_dir)
        .and_then(|_| std::fs::File::create(&marker))
        .and_then(|_| std::fs::remove_file(&marker))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_file_appender_writes_dated_file() {
        let dir = std::env::temp_dir().join(format!("taskpilot-logs-{}", uuid::Uuid::new_v4()));
        let dir = dir.to_string_lossy().to_string();
        assert!(can_write_logs(&dir));

        let mut appender = file_appender(&dir, "taskpilot_bot");
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let expected = format!(
            "taskpilot_bot.log.{}",
            chrono::Utc::now().format("%Y-%m-%d")
        );
        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![expected]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
