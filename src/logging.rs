#![forbid(unsafe_code)]

//! Console logging built on `tracing-subscriber`.

use anyhow::{Result, anyhow};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// timestamp LEVEL target: message
    Compact,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Noisy dependencies are clamped regardless of the base level.
const NOISY_TARGETS: &[(&str, &str)] = &[
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("h2", "warn"),
    ("libsql", "warn"),
    ("tower", "warn"),
];

fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return Ok(from_env);
    }

    let mut directives = vec![level.trim().to_string()];
    for (target, lvl) in NOISY_TARGETS {
        directives.push(format!("{target}={lvl}"));
    }
    let filter = directives.join(",");
    EnvFilter::try_new(&filter).map_err(|err| anyhow!("invalid log filter '{filter}': {err}"))
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = build_env_filter(level)?;
    let layer = match LogFormat::parse(format) {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|err| anyhow!("installing log subscriber: {err}"))?;

    tracing::debug!(level, format, "logging initialized");
    Ok(())
}
