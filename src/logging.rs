//! Diagnostic tracing on stderr.
//!
//! Routine results go to the routine directory; this is only for following a
//! run as it happens. Level comes from `RUST_LOG`, default `info`:
//!
//! ```bash
//! RUST_LOG=aerorout=debug aerorout run --config routine.toml
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
