//! In-process transports.
//!
//! [`LoopbackTransport`] is the semantic reference implementation: all real
//! transports must behave identically to it. If behavior differs, the other
//! transport has the bug.
//!
//! Characteristics:
//! - no framing, no I/O; a round trip is a dispatch through a [`Router`]
//! - still participates fully in proxy semantics (result framing, error
//!   discriminants, teardown races)

use std::io;
use std::sync::Arc;

use skiff_proxy::{BoxTransportFuture, CallContext, Transport, error_payload, remote_error_code};
use skiff_wire::{Request, Response};

use crate::Router;

/// Transport that answers requests by dispatching through a [`Router`].
pub struct LoopbackTransport {
    router: Arc<Router>,
}

impl LoopbackTransport {
    /// Create a transport dispatching into the given router.
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    /// The router this transport dispatches into.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }
}

impl Transport for LoopbackTransport {
    fn roundtrip(&self, request: Request) -> BoxTransportFuture<'_> {
        let router = self.router.clone();
        Box::pin(async move {
            let payload = match router.resolve(request.target) {
                Some(target) => {
                    let cx = CallContext::new(request.target, request.request_id, request.method);
                    target.dispatch(cx, request.payload).await
                }
                // A request for a capability nobody answers for anymore:
                // the target is gone, not the transport.
                None => {
                    trace!(capability = %request.target, "request for unknown capability");
                    error_payload(remote_error_code::TARGET_DESTROYED)
                }
            };
            Ok(Response {
                request_id: request.request_id,
                payload,
            })
        })
    }
}

/// Transport that never answers; calls stay in flight until the connection
/// is torn down. For exercising teardown-cancels-pending-calls.
pub struct PendingTransport;

impl Transport for PendingTransport {
    fn roundtrip(&self, _request: Request) -> BoxTransportFuture<'_> {
        Box::pin(std::future::pending::<io::Result<Response>>())
    }
}

/// Transport that fails every request with an I/O error. For exercising the
/// "request never delivered" half of the error taxonomy.
pub struct FailingTransport;

impl Transport for FailingTransport {
    fn roundtrip(&self, _request: Request) -> BoxTransportFuture<'_> {
        Box::pin(std::future::ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "transport failed",
        ))))
    }
}
