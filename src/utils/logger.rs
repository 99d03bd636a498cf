//! Diagnostic logging
//!
//! Diagnostics share stderr with the report, so the format is compact and
//! carries no timestamps.

use crate::config::DEFAULT_LOG_FILTER;
use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialise the tracing subscriber
///
/// # Arguments
/// * `log_level` - filter directive (trace, debug, info, warn, error); when `None`
///   the `RUST_LOG` environment variable is used, then [`DEFAULT_LOG_FILTER`]
///
/// # Examples
/// ```no_run
/// use jobwatch::utils::logger::init_logger;
///
/// init_logger(None).unwrap();
/// ```
pub fn init_logger(log_level: Option<&str>) -> Result<()> {
    let env_filter = match log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .without_time()
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
