#![deny(unsafe_code)]

//! skiff-testkit: in-process reference pieces for exercising the proxy layer.
//!
//! Provides:
//! - [`Router`] - capability registry standing in for the far side of a
//!   real transport
//! - [`LoopbackTransport`] - the **semantic reference** transport; every
//!   real transport must behave identically to it
//! - [`PendingTransport`] / [`FailingTransport`] - misbehaving transports
//!   for teardown and failure tests
//! - hand-expanded interface glue ([`counter`], [`directory`],
//!   [`transformer`]) of the shape a code generator would emit, plus
//!   simple native implementations to wrap

#[macro_use]
mod macros;

pub mod counter;
pub mod directory;
pub mod transformer;

mod router;
mod transport;

pub use router::*;
pub use transport::*;

/// Install a subscriber that prints trace output for a test run.
///
/// Honors `RUST_LOG`; repeated calls are fine (later ones are no-ops).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
