//! Global `tracing` subscriber setup.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

const DEFAULT_FILTER: &str = "info";
const TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, Error)]
#[error("failed to initialize logger: {0}")]
pub struct Error(String);

/// Installs the process-wide subscriber.
///
/// Events go to stderr so stdout only carries generated text. `RUST_LOG`
/// overrides the default `info` filter.
pub fn init() -> Result<(), Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error(e.to_string()))
}
