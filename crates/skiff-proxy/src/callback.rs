//! Callback wrappers: function values as remote-invocable capabilities.
//!
//! A method parameter of callable type crosses the boundary the same way
//! any interface does. The side that owns the executable code exports a
//! [`CallbackServer`] wrapping a [`LocalCallback`]; the other side invokes
//! it through a [`RemoteCallback`]. Callers of [`Callback::call`] never
//! need to know which side owns the code.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use facet::Facet;
use skiff_wire::{CALLBACK_CALL, CapabilityId, Payload};

use crate::errors::remote_error_code;
use crate::method::error_payload;
use crate::{
    Accessor, BoxInvokeFuture, CallContext, CallError, ClientProxy, Connection, Dispatch, Field,
    FieldFlags, MethodDescriptor, encode_ok,
};

/// Future returned by [`Callback::call`].
pub type BoxCallFuture<'a, R> = Pin<Box<dyn Future<Output = Result<R, CallError>> + Send + 'a>>;

static CALLBACK_FIELDS: [Accessor; 2] = [
    Accessor::new(Field::new("args", 0), FieldFlags::IN),
    Accessor::new(Field::new("result", 1), FieldFlags::OUT),
];

/// Descriptor for the single operation a callback capability exposes.
pub static CALLBACK_DESCRIPTOR: MethodDescriptor =
    MethodDescriptor::new(CALLBACK_CALL.raw(), "callback.call", &CALLBACK_FIELDS);

/// A function value callable across the connection.
///
/// `Args` is the argument tuple, `R` the result. The error type is fixed at
/// `CallError<Infallible>`: a callback's own failure modes are transport
/// and marshaling, never an application error of the callee's choosing.
pub trait Callback<Args, R>: Send + Sync {
    /// Invoke the function value.
    fn call(&self, args: Args) -> BoxCallFuture<'_, R>;
}

// ============================================================================
// Local adapter
// ============================================================================

/// Adapter invoking a genuine local function value.
pub struct LocalCallback<F> {
    func: F,
}

impl<F> LocalCallback<F> {
    /// Wrap a native function value.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Args, R> Callback<Args, R> for LocalCallback<F>
where
    F: Fn(Args) -> R + Send + Sync,
    Args: Send + 'static,
    R: Send + 'static,
{
    fn call(&self, args: Args) -> BoxCallFuture<'_, R> {
        Box::pin(std::future::ready(Ok((self.func)(args))))
    }
}

// ============================================================================
// Remote adapter
// ============================================================================

/// Adapter forwarding calls to a callback capability on the far side.
pub struct RemoteCallback<Args, R> {
    proxy: ClientProxy,
    _types: PhantomData<fn(Args) -> R>,
}

impl<Args, R> RemoteCallback<Args, R> {
    /// Create an adapter for the given callback capability.
    pub fn new(capability: CapabilityId, connection: Connection) -> Self {
        Self {
            proxy: ClientProxy::new(capability, connection, false),
            _types: PhantomData,
        }
    }

    /// The capability this adapter forwards to.
    pub fn capability(&self) -> CapabilityId {
        self.proxy.capability()
    }
}

impl<Args, R> Callback<Args, R> for RemoteCallback<Args, R>
where
    Args: Facet<'static> + Send + Sync + 'static,
    R: Facet<'static> + Send + Sync + 'static,
{
    fn call(&self, args: Args) -> BoxCallFuture<'_, R> {
        Box::pin(async move { self.proxy.call(&CALLBACK_DESCRIPTOR, &args).await })
    }
}

// ============================================================================
// Server side
// ============================================================================

/// Exposes any [`Callback`] as a dispatchable capability.
///
/// Answers only [`CALLBACK_CALL`]; callback capabilities have exactly one
/// operation, so there is no method table to carry.
pub struct CallbackServer<Args, R> {
    callback: Arc<dyn Callback<Args, R>>,
}

impl<Args, R> CallbackServer<Args, R> {
    /// Wrap a callback for export.
    pub fn new(callback: Arc<dyn Callback<Args, R>>) -> Self {
        Self { callback }
    }
}

impl<Args, R> Dispatch for CallbackServer<Args, R>
where
    Args: Facet<'static> + Send + Sync + 'static,
    R: Facet<'static> + Send + Sync + 'static,
{
    fn dispatch(&self, cx: CallContext, payload: Payload) -> BoxInvokeFuture {
        if cx.method_id != CALLBACK_CALL {
            warn!(method = %cx.method_id, "callback capability knows only its call method");
            return Box::pin(std::future::ready(error_payload(
                remote_error_code::UNKNOWN_METHOD,
            )));
        }
        let callback = self.callback.clone();
        Box::pin(async move {
            let args: Args = match facet_postcard::from_slice(&payload) {
                Ok(args) => args,
                Err(_) => return error_payload(remote_error_code::INVALID_PAYLOAD),
            };
            match callback.call(args).await {
                Ok(ref value) => {
                    encode_ok(value).unwrap_or_else(|_| error_payload(remote_error_code::INTERNAL))
                }
                Err(e) => {
                    debug!("callback invocation failed: {e}");
                    error_payload(remote_error_code::INTERNAL)
                }
            }
        })
    }
}
