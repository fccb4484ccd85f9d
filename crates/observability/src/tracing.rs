//! Tracing/logging initialization.
//!
//! `RUST_LOG` sets the filter (default `info`). Output is JSON unless
//! `STOCKLEDGER_LOG_FORMAT=pretty`.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// Unknown values fall back to JSON.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            filter: lookup("RUST_LOG")
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            format: lookup("STOCKLEDGER_LOG_FORMAT")
                .map(|raw| LogFormat::parse(&raw))
                .unwrap_or_default(),
        }
    }
}

/// Initialize tracing/logging for the process from the environment.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(&LogSettings::from_env());
}

/// Install a global subscriber for `settings`. Returns `false` when one was
/// already installed.
pub fn init_with(settings: &LogSettings) -> bool {
    let filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = match settings.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init()
            .is_ok(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .try_init()
            .is_ok(),
    };
    if installed {
        tracing::debug!(filter = %settings.filter, format = ?settings.format, "tracing initialized");
    }
    installed
}
