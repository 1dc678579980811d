//! Structured logging for the taskwell processes.
//!
//! The three long-running processes (`serve`, `worker`, `scheduler`)
//! each write their own daily-rotated JSON file under the configured
//! logs directory plus human-readable stderr output, so co-located
//! processes never interleave in one file. One-shot commands
//! (`migrate`) log to stderr only.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset: application at info, the
/// chattiest dependencies at warn.
const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn,reqwest=warn";

/// Which taskwell process is logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// The HTTP API (`serve`).
    Api,
    /// A background job worker (`worker`).
    Worker,
    /// The daily scheduler (`scheduler`).
    Scheduler,
    /// A one-shot command (`migrate`): stderr only, no file.
    OneShot,
}

impl LogMode {
    /// Rotated-file prefix for this process, when it writes one.
    fn file_prefix(self) -> Option<&'static str> {
        match self {
            Self::Api => Some("taskwell-api.log"),
            Self::Worker => Some("taskwell-worker.log"),
            Self::Scheduler => Some("taskwell-scheduler.log"),
            Self::OneShot => None,
        }
    }
}

/// Holds the non-blocking writer guard for file logging.
///
/// Must be kept alive for the duration of the process; dropping it
/// flushes pending entries and closes the file. One-shot modes carry
/// no guard.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Initialise logging for a taskwell process.
///
/// Long-running modes get a daily-rotated JSON file in `logs_dir` named
/// after the process, plus stderr output; [`LogMode::OneShot`] is
/// stderr-only and ignores `logs_dir`. The filter comes from `RUST_LOG`
/// or falls back to [`DEFAULT_FILTER`].
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init(mode: LogMode, logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let Some(prefix) = mode.file_prefix() else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(LoggingGuard { _file: None });
    };

    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let appender = tracing_appender::rolling::daily(logs_dir, prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(file_writer))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();

    Ok(LoggingGuard { _file: Some(guard) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_service_gets_its_own_file() {
        let prefixes: Vec<_> = [LogMode::Api, LogMode::Worker, LogMode::Scheduler]
            .iter()
            .filter_map(|m| m.file_prefix())
            .collect();
        assert_eq!(prefixes.len(), 3);
        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_one_shot_mode_writes_no_file() {
        assert!(LogMode::OneShot.file_prefix().is_none());
    }
}
