//! Logging setup for processes embedding the repair manager.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a fmt subscriber filtered by `RUST_LOG` plus `default_directive`
/// (for example `"repair_manager=info"`).
///
/// Fails if a global subscriber is already installed; callers that may run
/// this twice (tests) can ignore the error.
pub fn init_logging(default_directive: &str) -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive(default_directive.parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("tokio_cron_scheduler=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    fmt()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
