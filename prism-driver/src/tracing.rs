//! Provide tracing, tailored to this crate.
//!
//! Programs using the driver should call one of the init_* functions at
//! startup to install a tracing subscriber. The driver itself only emits
//! events; it never installs a subscriber.
//!
//! Modules can `use crate::tracing::prelude::*` for the `trace!()`,
//! `debug!()`, `info!()`, `warn!()`, and `error!()` macros.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Initialize logging.
///
/// If running under systemd, use journald; otherwise fall back to stdout.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry().with(layer).init();
        } else {
            use_stdout();
            error!("Failed to initialize journald logging, using stdout.");
        }
    } else {
        use_stdout();
    }
}

// Log to stdout, filtering according to RUST_LOG and defaulting to INFO.
// Per-byte bus traffic is at TRACE, so RUST_LOG=prism_driver=trace shows the
// full wire conversation.
fn use_stdout() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

// Local time to the nearest millisecond; bus timing problems are easier to
// read against wall-clock stamps than the default UTC string.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        let stamp = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second].[subsecond digits:3]"
            ))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", stamp)
    }
}
