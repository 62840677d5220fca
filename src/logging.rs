//! Logging configuration

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Default filter directive, e.g. `info` or `lan_probe_rs=debug`.
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays free
/// for scan output.
pub fn init_logging(options: &LogOptions) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.level))
        .map_err(|e| anyhow!("invalid log filter `{}`: {e}", options.level))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if options.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
