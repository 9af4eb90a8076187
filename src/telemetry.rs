//! Tracing setup shared by binaries, demos, and integration tests.

use std::sync::Once;

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber: env-filtered fmt output plus an
/// [`ErrorLayer`] so errors captured inside instrumented spans carry their
/// span trace.
///
/// `RUST_LOG` wins over `default_filter`. Safe to call repeatedly; only the
/// first call installs anything, so tests can all call it without
/// coordinating.
pub fn init_tracing(default_filter: &str) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .with(ErrorLayer::default())
            .try_init();
    });
}
