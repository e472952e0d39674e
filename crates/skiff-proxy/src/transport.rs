//! Transport abstraction.
//!
//! The connection delegates actual delivery to a [`Transport`]: anything
//! that can round-trip a [`Request`] to the far side and bring back the
//! matching [`Response`]. Serialization of payload bytes happens above this
//! trait; framing and I/O happen below it.

use std::future::Future;
use std::io;
use std::pin::Pin;

use skiff_wire::{Request, Response};

/// Future returned by [`Transport::roundtrip`].
pub type BoxTransportFuture<'a> = Pin<Box<dyn Future<Output = io::Result<Response>> + Send + 'a>>;

/// Trait for transports that can deliver a request and return its response.
///
/// A transport may resolve the round trip however it likes - an in-process
/// dispatch table, a socket with a demux loop on another thread, shared
/// memory. The connection only requires that each request eventually yields
/// its response or an `io::Error`, and that the transport is safe to drive
/// from multiple tasks at once.
pub trait Transport: Send + Sync {
    /// Deliver one request and wait for its response.
    fn roundtrip(&self, request: Request) -> BoxTransportFuture<'_>;
}
