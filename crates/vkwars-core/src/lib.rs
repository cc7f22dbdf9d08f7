// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Installs the global fmt subscriber. `RUST_LOG` wins over the default filter.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_LOG_FILTER);
}

pub fn init_tracing_with(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
