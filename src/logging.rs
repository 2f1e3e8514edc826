//! Diagnostic logging setup for the binary.
//!
//! Logs go to stderr so stdout stays clean for results and `--json`.

use std::io;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Default level for a `-v` count: warn, info, then debug.
pub fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
///
/// Does nothing if a subscriber is already installed.
pub fn init(verbosity: u8) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_for_verbosity(verbosity).into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
