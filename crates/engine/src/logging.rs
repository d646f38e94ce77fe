//! Logging bootstrap for the engine, same shape as the rest of this
//! workspace's `setup_logging` helpers.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::EngineError;

pub fn setup_logging(default_level: &str) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| EngineError::InvalidRequest(format!("invalid log filter: {e}")))?;

    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();

    Ok(())
}
