//! Logging setup
//!
//! All logs go to stderr through `tracing-subscriber`; stdout carries JSON
//! envelopes only. `RUST_LOG` wins over the configured level.

use tracing_subscriber::EnvFilter;

use crate::config::LogSettings;

const DEFAULT_LEVEL: &str = "info";

/// Driver crates that are chatty at `info`/`debug`
const NOISY_TARGETS: &[(&str, &str)] =
    &[("tokio_postgres", "warn"), ("mysql_async", "warn"), ("rusqlite", "warn")];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// `timestamp LEVEL target: message fields`
    Compact,
    /// JSON lines
    Json,
}

impl LogFormat {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" | "jsonl" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Build the filter from `RUST_LOG`, or from the configured level plus noisy-crate overrides.
fn build_env_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut directives = vec![level.to_string()];
    for (target, lvl) in NOISY_TARGETS {
        directives.push(format!("{target}={lvl}"));
    }

    EnvFilter::try_new(directives.join(",")).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Initialize the global subscriber. Safe to call more than once; later calls are no-ops.
pub fn init(settings: &LogSettings) {
    let level = settings.level.as_deref().unwrap_or(DEFAULT_LEVEL);
    let format = settings.format.as_deref().map_or(LogFormat::Compact, LogFormat::parse);
    let filter = build_env_filter(level);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    // try_init fails only when a subscriber is already installed
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().with_ansi(false).try_init(),
    };
}
