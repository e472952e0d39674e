//! The connection handle: request delivery plus lifetime bookkeeping.
//!
//! A [`Connection`] binds every proxy on this side of the boundary to the
//! transport that carries its calls, and owns the cleanup registry that
//! keeps those proxies from dangling when the connection dies first.
//!
//! Teardown guarantees, in order:
//! - `close()` is idempotent; only the first call tears down
//! - every in-flight call resolves with `ConnectionClosed` instead of hanging
//! - every registered cleanup runs exactly once, in reverse-registration
//!   order, and a panicking cleanup does not stop the rest

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use skiff_wire::{CapabilityId, MethodId, Payload, Request, RequestId};

use crate::{Transport, TransportError};

// ============================================================================
// Request ID generation
// ============================================================================

/// Generates unique request IDs for a connection.
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Generate the next unique request ID.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Cleanup registry
// ============================================================================

type CleanupFn = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle to a registered cleanup callback or close hook.
///
/// Supports O(log n) removal without scanning the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupHandle(u64);

impl CleanupHandle {
    /// Handle returned when registering on an already-closed connection:
    /// the callback already ran, so there is nothing to unregister.
    pub const VACANT: Self = Self(0);

    /// True if this handle never referred to a live registry entry.
    pub fn is_vacant(self) -> bool {
        self.0 == 0
    }
}

/// Ordered registry of teardown callbacks, keyed by handle.
///
/// `BTreeMap` keyed by a monotonically increasing counter keeps entries in
/// registration order, which teardown walks in reverse.
#[derive(Default)]
struct CleanupRegistry {
    next: u64,
    entries: BTreeMap<u64, CleanupFn>,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle binding proxies to the transport that carries their calls.
///
/// Cheap to clone; all clones share one underlying connection. A proxy
/// holds a clone rather than owning the connection, so connection lifetime
/// is governed by whoever created it (or by a client proxy constructed with
/// `destroy_connection`).
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    transport: Arc<dyn Transport>,
    request_ids: RequestIdGenerator,
    cleanups: Mutex<CleanupRegistry>,
    closed: AtomicBool,
    close_notify: Notify,
}

impl Connection {
    /// Create a connection over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                transport,
                request_ids: RequestIdGenerator::new(),
                cleanups: Mutex::new(CleanupRegistry::default()),
                closed: AtomicBool::new(false),
                close_notify: Notify::new(),
            }),
        }
    }

    /// True once `close()` has begun.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of callbacks currently registered. Diagnostic.
    pub fn cleanup_count(&self) -> usize {
        self.inner.cleanups.lock().entries.len()
    }

    // ------------------------------------------------------------------------
    // Cleanup registry
    // ------------------------------------------------------------------------

    /// Register a callback to run when this connection is torn down.
    ///
    /// Callbacks run exactly once, in reverse-registration order. If the
    /// connection is already closed the callback runs immediately on the
    /// calling thread and [`CleanupHandle::VACANT`] is returned.
    pub fn register_cleanup(&self, callback: impl FnOnce() + Send + 'static) -> CleanupHandle {
        let mut registry = self.inner.cleanups.lock();
        if self.inner.closed.load(Ordering::SeqCst) {
            drop(registry);
            debug!("cleanup registered on closed connection, running immediately");
            callback();
            return CleanupHandle::VACANT;
        }
        registry.next += 1;
        let id = registry.next;
        registry.entries.insert(id, Box::new(callback));
        CleanupHandle(id)
    }

    /// Remove a previously registered callback without running it.
    ///
    /// Returns true if the entry was present. Unregistering a handle that
    /// was already removed is a programming error; it trips a debug
    /// assertion and is otherwise ignored. Handles vacated by teardown or
    /// by [`CleanupHandle::VACANT`] unregister quietly.
    pub fn unregister_cleanup(&self, handle: CleanupHandle) -> bool {
        if handle.is_vacant() {
            return false;
        }
        let mut registry = self.inner.cleanups.lock();
        if self.inner.closed.load(Ordering::SeqCst) {
            // Teardown already drained the registry.
            return false;
        }
        let removed = registry.entries.remove(&handle.0).is_some();
        debug_assert!(removed, "cleanup handle unregistered twice");
        if !removed {
            warn!("cleanup handle unregistered twice");
        }
        removed
    }

    /// Register a close hook: a cleanup that external code may also trigger
    /// early, when the native resource it guards reaches the end of its
    /// life before the connection does.
    ///
    /// Glue wrapping a borrowed implementation uses this to destroy the
    /// matching server proxy at the right native-side lifetime boundary,
    /// since the far side has no other signal that the object is gone.
    pub fn add_close_hook(&self, callback: impl FnOnce() + Send + 'static) -> CleanupHandle {
        self.register_cleanup(callback)
    }

    /// Run a close hook now, removing it from the registry.
    ///
    /// Returns true if the hook ran. A hook that already ran (here or at
    /// teardown) is ignored.
    pub fn trigger_close_hook(&self, handle: CleanupHandle) -> bool {
        if handle.is_vacant() {
            return false;
        }
        let callback = self.inner.cleanups.lock().entries.remove(&handle.0);
        match callback {
            Some(callback) => {
                debug!("close hook triggered early");
                callback();
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    /// Deliver one call and wait for its response payload.
    ///
    /// Races the transport round trip against connection teardown: if the
    /// connection closes first, resolves with `ConnectionClosed` rather
    /// than waiting on a transport that may never answer.
    pub async fn call(
        &self,
        target: CapabilityId,
        method: MethodId,
        payload: Payload,
    ) -> Result<Payload, TransportError> {
        let inner = &self.inner;

        // Arm the notification before checking the flag so a close between
        // the check and the select cannot be missed.
        let closed = inner.close_notify.notified();
        tokio::pin!(closed);
        if inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let request = Request {
            target,
            request_id: RequestId::new(inner.request_ids.next()),
            method,
            payload,
        };
        trace!(capability = %request.target, method = %request.method, request_id = %request.request_id, "sending request");

        let roundtrip = inner.transport.roundtrip(request);
        tokio::select! {
            result = roundtrip => {
                let response = result.map_err(TransportError::Io)?;
                Ok(response.payload)
            }
            _ = &mut closed => Err(TransportError::ConnectionClosed),
        }
    }

    /// Fire a destroy hook at the far side without waiting for the answer.
    ///
    /// Used by client proxy drop glue, which cannot await. Requires an
    /// ambient tokio runtime to carry the call; without one the hook is
    /// skipped (the deterministic path is the proxy's explicit `destroy()`).
    pub fn notify_destroy(&self, target: CapabilityId, method: MethodId) {
        if self.is_closed() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(capability = %target, "destroy hook skipped: no runtime to deliver it");
            return;
        };
        let connection = self.clone();
        runtime.spawn(async move {
            if let Err(e) = connection.call(target, method, Payload::new()).await {
                debug!(capability = %target, "destroy hook not delivered: {e}");
            }
        });
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Tear down the connection.
    ///
    /// Idempotent. Wakes every in-flight call (they resolve with
    /// `ConnectionClosed`), then runs all registered cleanups in
    /// reverse-registration order. A panicking cleanup is caught so the
    /// remaining cleanups still run.
    pub fn close(&self) {
        let drained = {
            let mut registry = self.inner.cleanups.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut registry.entries)
        };
        debug!(cleanups = drained.len(), "connection closing");
        self.inner.close_notify.notify_waiters();
        run_cleanups(drained);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .field("cleanups", &self.cleanup_count())
            .finish()
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        // Last handle gone without an explicit close(): run whatever is
        // still registered so no cleanup is silently lost.
        if !self.closed.swap(true, Ordering::SeqCst) {
            let drained = std::mem::take(&mut self.cleanups.get_mut().entries);
            run_cleanups(drained);
        }
    }
}

/// Run drained cleanups newest-first, shielding each from the others.
fn run_cleanups(entries: BTreeMap<u64, CleanupFn>) {
    for (_, callback) in entries.into_iter().rev() {
        if std::panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
            error!("cleanup callback panicked during connection teardown");
        }
    }
}
