//! Hand-expanded glue for a `Counter` interface.
//!
//! This module has the shape a code generator would emit for
//!
//! ```text
//! interface Counter {
//!     increment(delta: i32) -> (total: i32);
//!     destroy();   # lifecycle hook
//! }
//! ```
//!
//! and doubles as the worked example for the proxy layer: descriptors with
//! accessor tables, a typed client over [`ClientProxy`], and a server
//! wrapper that intercepts the destroy hook to release its implementation.

use std::future::Future;
use std::sync::Arc;

use skiff_proxy::{
    Accessor, BoxInvokeFuture, CallContext, CallError, ClientProxy, Connection, Dispatch, Field,
    FieldFlags, MethodDescriptor, MethodEntry, Payload, ServerContext, ServerProxy, encode_ok,
    error_payload, invoke_call_infallible, remote_error_code,
};
use skiff_wire::CapabilityId;

/// A counter that can be driven from the far side of a connection.
pub trait Counter: Send + Sync + 'static {
    /// Add `delta` to the running total and return the new total.
    fn increment(&self, delta: i32) -> impl Future<Output = i32> + Send;
}

// ============================================================================
// Descriptors
// ============================================================================

static INCREMENT_FIELDS: [Accessor; 2] = [
    Accessor::new(Field::new("delta", 0), FieldFlags::IN),
    Accessor::new(Field::new("total", 1), FieldFlags::OUT),
];

/// `Counter::increment`.
pub static INCREMENT: MethodDescriptor =
    MethodDescriptor::new(1, "counter.increment", &INCREMENT_FIELDS);

static DESTROY_FIELDS: [Accessor; 0] = [];

/// The interface's destroy lifecycle hook.
pub static DESTROY: MethodDescriptor = MethodDescriptor::new(2, "counter.destroy", &DESTROY_FIELDS);

// ============================================================================
// Client side
// ============================================================================

/// Typed client: implements the counter interface by forwarding.
pub struct CounterClient {
    proxy: ClientProxy,
}

impl CounterClient {
    /// Bind a client to a counter capability.
    pub fn new(capability: CapabilityId, connection: Connection, destroy_connection: bool) -> Self {
        Self {
            proxy: ClientProxy::new(capability, connection, destroy_connection)
                .with_destroy(&DESTROY),
        }
    }

    /// Add `delta` and return the new total.
    pub async fn increment(&self, delta: i32) -> Result<i32, CallError> {
        self.proxy.call(&INCREMENT, &(delta,)).await
    }

    /// Release the far side's counter deterministically.
    pub async fn destroy(&self) -> Result<(), CallError> {
        self.proxy.destroy().await
    }

    /// The underlying proxy base.
    pub fn proxy(&self) -> &ClientProxy {
        &self.proxy
    }
}

// ============================================================================
// Server side
// ============================================================================

fn invoke_increment<S: Counter>(
    implementation: Arc<S>,
    cx: ServerContext,
    payload: Payload,
) -> BoxInvokeFuture {
    invoke_call_infallible(cx, payload, move |(delta,): (i32,)| async move {
        implementation.increment(delta).await
    })
}

/// Method table for a counter implementation.
pub fn counter_methods<S: Counter>() -> Vec<MethodEntry<S>> {
    vec![MethodEntry::new(&INCREMENT, invoke_increment::<S>)]
}

/// Server wrapper: a [`ServerProxy`] plus the destroy-hook interception.
///
/// The destroy hook has no native method behind it; its effect is on the
/// proxy itself, so the wrapper answers it directly instead of routing it
/// through the method table.
pub struct CounterServer<S> {
    proxy: Arc<ServerProxy<S>>,
}

impl<S: Counter> CounterServer<S> {
    /// Wrap a counter transferred by ownership.
    pub fn owned(implementation: S, connection: Connection) -> Self {
        Self {
            proxy: Arc::new(ServerProxy::owned(
                implementation,
                connection,
                counter_methods(),
            )),
        }
    }

    /// Wrap a counter owned elsewhere; pair with a close hook that revokes
    /// this server's capability at the native lifetime boundary.
    pub fn borrowed(implementation: Arc<S>, connection: Connection) -> Self {
        Self {
            proxy: Arc::new(ServerProxy::borrowed(
                implementation,
                connection,
                counter_methods(),
            )),
        }
    }

    /// The underlying proxy base.
    pub fn proxy(&self) -> &Arc<ServerProxy<S>> {
        &self.proxy
    }
}

impl<S: Counter> Dispatch for CounterServer<S> {
    fn dispatch(&self, cx: CallContext, payload: Payload) -> BoxInvokeFuture {
        if cx.method_id == DESTROY.id {
            self.proxy.invoke_destroy();
            let payload =
                encode_ok(&()).unwrap_or_else(|_| error_payload(remote_error_code::INTERNAL));
            return Box::pin(std::future::ready(payload));
        }
        self.proxy.dispatch(cx, payload)
    }
}

// ============================================================================
// A native implementation to wrap
// ============================================================================

/// Plain in-memory counter.
#[derive(Default)]
pub struct TallyCounter {
    total: std::sync::atomic::AtomicI32,
}

impl TallyCounter {
    /// Start from zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current total, read locally.
    pub fn total(&self) -> i32 {
        self.total.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Counter for TallyCounter {
    async fn increment(&self, delta: i32) -> i32 {
        self.total
            .fetch_add(delta, std::sync::atomic::Ordering::SeqCst)
            + delta
    }
}
