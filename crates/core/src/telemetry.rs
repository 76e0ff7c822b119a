//! Structured logging setup shared by the proxy binary.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs a global `tracing` subscriber.
///
/// `default_level` is used to build the `EnvFilter` when `RUST_LOG` is unset;
/// `RUST_LOG` always takes precedence when present.
pub fn init_tracing(default_level: &str) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	let registry = tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_target(true));

	if registry.try_init().is_err() {
		// A subscriber is already installed (e.g. in tests); nothing to do.
	}
}
