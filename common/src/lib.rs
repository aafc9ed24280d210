pub mod args;
pub mod audit;
pub mod backoff;
pub mod clock;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod proxy;
pub mod shutdown;

pub use clock::{Clock, FakeClock, SharedClock, SystemClock, system_clock};
pub use error::{Error, Result};

/// Process-wide one-time setup: installs the rustls crypto provider (needed
/// transitively by tonic's TLS transport) and disables ANSI colors when
/// asked to. Call once from each binary's `main`.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
}

/// Writes the readiness file consumed by the container's liveness probe.
pub fn signal_ready() {
    let _ = std::fs::write("/tmp/ready", "ready");
}
