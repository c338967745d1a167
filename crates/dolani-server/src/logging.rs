//! Logging initialization.
//!
//! - **Production** (`DOLANI_ENV=production`): JSON logs to rolling files
//!   plus compact logs to stdout
//! - **Development**: pretty logs to stdout with span events

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Selects production logging when set to `production`.
pub const ENV_VAR: &str = "DOLANI_ENV";

/// Fallback filter directive when `RUST_LOG` is unset.
pub const LOG_LEVEL_VAR: &str = "DOLANI_LOG_LEVEL";

/// Guards keeping the non-blocking writers alive for the whole process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Whether `DOLANI_ENV` asks for production logging.
#[must_use]
pub fn is_production() -> bool {
    std::env::var(ENV_VAR).is_ok_and(|value| value.eq_ignore_ascii_case("production"))
}

/// Initialize the global subscriber.
///
/// The filter comes from `RUST_LOG`, else `DOLANI_LOG_LEVEL`, else `info`.
/// Production logs go to daily files under `/var/log/dolani/` as JSON and
/// to stdout without colors for the journal.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let log_level = std::env::var(LOG_LEVEL_VAR).unwrap_or_else(|_| "info".to_string());
    let env_filter = build_filter(&log_level)?;

    if is_production {
        init_production(env_filter)?;
    } else {
        init_development(env_filter);
    }

    Ok(())
}

fn build_filter(fallback: &str) -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(fallback))?)
}

/// Initialize production logging with file + stdout output.
fn init_production(env_filter: EnvFilter) -> anyhow::Result<()> {
    let log_dir = log_directory();

    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir).ok();
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "dolani");

    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // Compact and colorless for journald
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    Ok(())
}

/// Initialize development logging with pretty stdout output.
fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Log directory for the current platform.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/dolani")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "dolani")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_valid_path() {
        let dir = log_directory();
        assert!(!dir.as_os_str().is_empty());
        assert!(dir.to_string_lossy().contains("dolani"));
    }

    #[test]
    fn test_fallback_filter_directives() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(build_filter("debug").is_ok());
        assert!(build_filter("dolani_core=trace,tower_http=info").is_ok());
        assert!(build_filter("dolani_core=[").is_err());
    }
}
