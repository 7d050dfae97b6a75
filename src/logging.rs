//! Process-wide log subscriber.
//!
//! Installed once from `main` before any other component runs. Everything
//! else logs through `tracing` macros and never reconfigures the subscriber.

use tracing::Level;

/// Verbosity selected at startup.
#[must_use]
pub fn level(debug: bool) -> Level {
    if debug { Level::DEBUG } else { Level::INFO }
}

/// Install the fmt subscriber. A second call leaves the first one in place.
pub fn init(debug: bool) {
    let installed = tracing_subscriber::fmt()
        .with_max_level(level(debug))
        .try_init();

    if let Err(e) = installed {
        tracing::debug!(error = %e, "log subscriber already installed");
    }
}
