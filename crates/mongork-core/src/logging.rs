//! Structured logging schema, field name constants, and subscriber setup.
//!
//! All crates use these constants for consistent structured logging fields.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Failed run or stream, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, step executions, run completions |
//! | DEBUG | Decision points, plans, skipped steps |
//! | TRACE | Per-event iteration in the tailer |

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "migration", "oplog", "db"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "engine", "executor", "lock", "tailer", "connection"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "run", "acquire", "release", "follow", "query"
pub const OPERATION: &str = "op";

// ─── Migration fields ──────────────────────────────────────────────────────

/// Step version being operated on.
pub const VERSION: &str = "version";

/// Run direction ("up" or "down").
pub const DIRECTION: &str = "direction";

/// Boundary version of a run.
pub const TARGET_VERSION: &str = "target_version";

/// Number of versions in a plan.
pub const PLAN_LEN: &str = "plan_len";

/// Whether a step ran inside a transaction.
pub const ATOMIC: &str = "atomic";

// ─── Oplog fields ──────────────────────────────────────────────────────────

/// Namespace (`db.collection`) of a change event or watch scope.
pub const NAMESPACE: &str = "namespace";

/// Number of events delivered to the render callback.
pub const EVENT_COUNT: &str = "event_count";

// ─── Measurement & outcome fields ──────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Subscriber output settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
    /// Optional file (rotated daily) receiving a copy of the output.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: "mongork_core=info,mongork_db=info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl LogConfig {
    /// Read `LOG_FORMAT` (`text`/`json`) and `LOG_FILE` from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(format) = lookup("LOG_FORMAT") {
            config.json = format.eq_ignore_ascii_case("json");
        }
        config.file = lookup("LOG_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        config
    }
}

/// Install the global tracing subscriber.
///
/// Returns the file appender guard (keep it alive for the process lifetime so
/// buffered lines are flushed). Does nothing if a subscriber is already set.
pub fn init(config: &LogConfig) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.default_filter.clone().into());

    let (file_writer, guard) = match config.file.as_ref() {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(std::path::Path::new("."));
            let name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or("mongork.log");
            let appender = tracing_appender::rolling::daily(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match (config.json, file_writer) {
        (true, Some(writer)) => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init(),
        (true, None) => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (false, Some(writer)) => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false) // no ANSI in files
                    .with_writer(writer),
            )
            .try_init(),
        (false, None) => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_log_config_defaults_to_text() {
        let config = LogConfig::from_lookup(|_| None);
        assert!(!config.json);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_log_config_reads_format_and_file() {
        let env: HashMap<&str, &str> =
            HashMap::from([("LOG_FORMAT", "JSON"), ("LOG_FILE", "/tmp/mongork.log")]);
        let config = LogConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert!(config.json);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/mongork.log")));
    }

    #[test]
    fn test_blank_log_file_is_ignored() {
        let config = LogConfig::from_lookup(|k| (k == "LOG_FILE").then(|| "  ".to_string()));
        assert!(config.file.is_none());
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        let config = LogConfig::default();
        let _ = init(&config);
        let _ = init(&config);
    }
}
