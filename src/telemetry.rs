//! Console tracing setup. The configured level applies to this crate;
//! `RUST_LOG` overrides everything when set.

use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
#[error("failed to initialize tracing subscriber: {0}")]
pub struct TelemetryError(String);

pub fn init(level: Level) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("reserve_bridge={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|error| TelemetryError(error.to_string()))
}
