use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking writers flushing until the process exits.
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

/// Console logging plus a daily-rotated file under `log_dir` when it is writable.
pub fn init_service_logging(log_dir: &str, service_name: &str) -> anyhow::Result<LogGuards> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (stdout_writer, stdout_guard) = non_blocking(std::io::stdout());
    let console_layer = fmt::layer()
        .with_writer(stdout_writer)
        .with_ansi(true)
        .with_target(false);

    let writable = log_dir_writable(log_dir);
    let mut guards = Vec::with_capacity(2);

    let file_layer = if writable {
        if let Err(e) = rotate_logs_on_startup(log_dir, service_name) {
            eprintln!("Could not rotate previous log file: {e}");
        }

        let file_appender =
            tracing_appender::rolling::daily(log_dir, format!("{service_name}.log"));
        let (file_writer, file_guard) = non_blocking(file_appender);
        guards.push(file_guard);
        Some(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true),
        )
    } else {
        None
    };
    guards.push(stdout_guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    if writable {
        info!("Logging initialized - logs will be written to {log_dir}/{service_name}.log");
    } else {
        info!("Logging initialized - console output only (could not write to {log_dir})");
    }
    Ok(LogGuards { _guards: guards })
}

fn log_dir_writable(log_dir: &str) -> bool {
    let probe = Path::new(log_dir).join(".write_probe");
    std::fs::create_dir_all(log_dir)
        .and_then(|_| std::fs::File::create(&probe))
        .and_then(|_| std::fs::remove_file(&probe))
        .is_ok()
}

pub fn rotate_logs_on_startup(log_dir: &str, service_name: &str) -> anyhow::Result<()> {
    let log_file = Path::new(log_dir).join(format!("{service_name}.log"));

    if log_file.exists() {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_file = Path::new(log_dir).join(format!("{service_name}.{timestamp}.log"));
        std::fs::rename(&log_file, &backup_file)?;
    }

    Ok(())
}
