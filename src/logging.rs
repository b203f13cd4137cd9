//! Logging setup.
//!
//! Log lines go to stderr so the reports printed on stdout stay pipeable.
//! The level comes from the settings (`[log] level`), unless `RUST_LOG` is set.

use std::time::Instant;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;

use crate::error::AppError;

/// Install the global subscriber.
///
/// Calling this twice is an error (exit code 2); tests that need logs should
/// use their own scoped subscriber instead.
pub fn setup_log(level: &str) -> Result<(), AppError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| AppError::new(2, format!("Invalid log level '{level}': {e}")))?,
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_timer(CompactTimestamp {
            start: Instant::now(),
        });

    Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| AppError::new(2, format!("Failed to initialise logging: {e}")))
}

/// Elapsed run time as `00h 00m 00s`.
#[derive(Clone)]
struct CompactTimestamp {
    start: Instant,
}

impl FormatTime for CompactTimestamp {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let elapsed = self.start.elapsed().as_secs();
        write!(w, "{:02}h {:02}m {:02}s", elapsed / 3600, (elapsed % 3600) / 60, elapsed % 60)
    }
}
