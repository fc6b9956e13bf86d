//! Logging configuration using tracing
//!
//! Structured logging to stderr with support for the RUST_LOG environment variable.

use crate::CadenceError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber
///
/// Filtering follows RUST_LOG and defaults to "warn" for quiet CLI output.
///
/// # Example RUST_LOG values
/// - `RUST_LOG=info` - Show phase transitions and map refreshes
/// - `RUST_LOG=cadence=debug` - Per-cycle decisions
/// - `RUST_LOG=cadence::agent=trace,aider=debug` - Different levels per module
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init() -> crate::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    install(env_filter)
}

/// Initialize with an explicit default level
///
/// RUST_LOG still wins when set. Used by the CLI `--verbose` flag.
pub fn init_with_level(level: &str) -> crate::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| CadenceError::Config(format!("Invalid log level '{}': {}", level, e)))?;
    install(env_filter)
}

fn install(env_filter: EnvFilter) -> crate::Result<()> {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| CadenceError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init();
}
