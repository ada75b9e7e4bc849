//! Optional `tracing-subscriber` setup, mirroring the pretty-formatter +
//! `RUST_LOG`-driven filter this codebase's CLI has always used to turn on
//! logging — offered to consumers as a convenience, never invoked by the
//! library itself. Taski only ever calls `tracing::{debug,info,warn,error}`;
//! wiring up a global subscriber is left to the binary that embeds it.

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a pretty, `RUST_LOG`-filtered global subscriber. Panics if a
/// global subscriber is already set — call this once, near the top of
/// `main`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(filter)
        .finish()
        .try_init()
        .expect("couldn't set up tracing");
}
