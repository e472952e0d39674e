//! Method descriptors and dispatch machinery.
//!
//! This module contains:
//! - [`MethodDescriptor`] and [`MethodEntry`] - the per-method records glue
//!   code registers for each interface
//! - [`CallContext`] and [`ServerContext`] - request context passed through
//!   dispatch
//! - [`Dispatch`] trait - implemented by server proxies and callback servers
//! - [`invoke_call`] and [`invoke_call_infallible`] - helpers that do the
//!   decode/invoke/encode dance so glue code stays a one-line closure
//! - [`decode_response`] - the client half of the result framing

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use facet::Facet;
use skiff_wire::{CapabilityId, MethodId, Payload, RESULT_ERR, RESULT_OK, RequestId};

use crate::errors::remote_error_code;
use crate::{Accessor, CallError, DecodeError, RemoteError, check_accessors};

/// Future returned by dispatch: resolves to the encoded response payload.
pub type BoxInvokeFuture = Pin<Box<dyn Future<Output = Payload> + Send + 'static>>;

// ============================================================================
// Method records
// ============================================================================

/// Static description of one interface method.
///
/// Glue code declares one of these per method as a `static`, so accessor
/// tables and descriptors live for the program's lifetime and both proxy
/// sides share a single source of truth for field metadata.
#[derive(Debug)]
pub struct MethodDescriptor {
    /// Method ID, unique within the interface.
    pub id: MethodId,
    /// Fully qualified method name, for logs and diagnostics.
    pub name: &'static str,
    /// Accessors for the method's parameters, then its result (if any),
    /// in declaration order.
    pub fields: &'static [Accessor],
}

impl MethodDescriptor {
    /// Create a new method descriptor.
    pub const fn new(id: u64, name: &'static str, fields: &'static [Accessor]) -> Self {
        Self {
            id: MethodId::new(id),
            name,
            fields,
        }
    }

    /// Accessors for fields sent with the request.
    pub fn in_fields(&self) -> impl Iterator<Item = &'static Accessor> {
        self.fields.iter().filter(|a| a.is_in())
    }

    /// Accessors for fields returned with the response.
    pub fn out_fields(&self) -> impl Iterator<Item = &'static Accessor> {
        self.fields.iter().filter(|a| a.is_out())
    }
}

/// Invocation function bound to a method: takes the wrapped implementation,
/// the server context, and the raw request payload, and produces the
/// encoded response payload.
pub type InvokeFn<S> = fn(Arc<S>, ServerContext, Payload) -> BoxInvokeFuture;

/// One row of a server proxy's method table: a descriptor plus the function
/// that invokes the native method behind it.
pub struct MethodEntry<S> {
    /// The method this entry answers.
    pub descriptor: &'static MethodDescriptor,
    /// Decodes the payload, calls the native method, encodes the result.
    pub invoke: InvokeFn<S>,
}

impl<S> MethodEntry<S> {
    /// Create an entry for a method with a native implementation behind it.
    pub fn new(descriptor: &'static MethodDescriptor, invoke: InvokeFn<S>) -> Self {
        debug_assert!(
            check_accessors(descriptor.fields),
            "inconsistent accessor table for {}",
            descriptor.name
        );
        Self { descriptor, invoke }
    }

    /// Create an entry for a lifecycle hook with no native method bound.
    ///
    /// Construct/destroy hooks have no parameters and no result; their
    /// invocation ignores the payload, never touches the implementation,
    /// and answers an encoded unit so the far side's call completes.
    pub fn lifecycle(descriptor: &'static MethodDescriptor) -> Self {
        Self {
            descriptor,
            invoke: lifecycle_invoke::<S>,
        }
    }
}

fn lifecycle_invoke<S>(_impl: Arc<S>, cx: ServerContext, _payload: Payload) -> BoxInvokeFuture {
    trace!(method = %cx.call.method_id, "lifecycle hook: no native method bound");
    let payload = encode_ok(&()).unwrap_or_else(|_| error_payload(remote_error_code::INTERNAL));
    Box::pin(std::future::ready(payload))
}

// ============================================================================
// Call context
// ============================================================================

/// Context passed through server-side dispatch.
///
/// Identifies which capability the request targets and which method it
/// invokes, so invoke functions and logs can name what they are doing.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    /// Capability the request targets.
    pub target: CapabilityId,
    /// The request ID for this call.
    pub request_id: RequestId,
    /// The method ID being called.
    pub method_id: MethodId,
}

impl CallContext {
    /// Create a new context.
    pub fn new(target: CapabilityId, request_id: RequestId, method_id: MethodId) -> Self {
        Self {
            target,
            request_id,
            method_id,
        }
    }
}

/// Context a server proxy hands to its invoke functions.
///
/// Carries the call identity plus the server side's connection binding, so
/// glue for capability-typed parameters can construct client adapters (a
/// [`RemoteCallback`](crate::RemoteCallback), a nested client proxy) on the
/// connection the request arrived over.
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// Identity of the call being dispatched.
    pub call: CallContext,
    /// The connection the request arrived over.
    pub connection: crate::Connection,
}

impl ServerContext {
    /// Create a new server context.
    pub fn new(call: CallContext, connection: crate::Connection) -> Self {
        Self { call, connection }
    }
}

// ============================================================================
// Dispatch trait
// ============================================================================

/// Trait for receiving forwarded calls.
///
/// Server proxies and callback servers implement this; a transport's far
/// side routes each request to the `Dispatch` registered for its target
/// capability. The returned future resolves to the full response payload,
/// error responses included - dispatch itself never fails.
pub trait Dispatch: Send + Sync {
    /// Handle one request and produce the encoded response payload.
    fn dispatch(&self, cx: CallContext, payload: Payload) -> BoxInvokeFuture;
}

// ============================================================================
// Invoke helpers
// ============================================================================

/// Helper for invoking a fallible method with minimal glue code.
///
/// Handles the common pattern:
/// 1. Decode the args tuple from the request payload
/// 2. Call the handler closure (which calls the native method)
/// 3. Encode the result with the response framing
///
/// The glue just provides a closure binding the implementation method:
///
/// ```ignore
/// fn invoke_lookup<S: Directory>(impl_: Arc<S>, cx: ServerContext, payload: Payload) -> BoxInvokeFuture {
///     invoke_call(cx, payload, move |(name,): (String,)| async move {
///         impl_.lookup(name).await
///     })
/// }
/// ```
///
/// A payload that does not decode answers `InvalidPayload` before the
/// handler runs; a result that does not encode answers `Internal`. Errors
/// raised by the handler pass through unchanged as `User` errors.
pub fn invoke_call<A, R, E, F, Fut>(
    cx: ServerContext,
    payload: Payload,
    handler: F,
) -> BoxInvokeFuture
where
    A: Facet<'static> + Send,
    R: Facet<'static> + Send,
    E: Facet<'static> + Send,
    F: FnOnce(A) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let args: A = match facet_postcard::from_slice(&payload) {
        Ok(args) => args,
        Err(_) => {
            warn!(method = %cx.call.method_id, "request payload did not decode");
            return Box::pin(std::future::ready(error_payload(
                remote_error_code::INVALID_PAYLOAD,
            )));
        }
    };

    Box::pin(async move {
        trace!(method = %cx.call.method_id, "invoke: handler starting");
        let result = handler(args).await;
        trace!(method = %cx.call.method_id, "invoke: handler finished");

        match result {
            Ok(ref value) => encode_ok(value)
                .unwrap_or_else(|_| error_payload(remote_error_code::INTERNAL)),
            Err(ref user_error) => encode_user_error(user_error)
                .unwrap_or_else(|_| error_payload(remote_error_code::INTERNAL)),
        }
    })
}

/// Invoke helper for infallible methods (those that return `T` instead of
/// `Result<T, E>`).
///
/// Same as [`invoke_call`] but for handlers that cannot fail at the
/// application level.
pub fn invoke_call_infallible<A, R, F, Fut>(
    cx: ServerContext,
    payload: Payload,
    handler: F,
) -> BoxInvokeFuture
where
    A: Facet<'static> + Send,
    R: Facet<'static> + Send,
    F: FnOnce(A) -> Fut + Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let args: A = match facet_postcard::from_slice(&payload) {
        Ok(args) => args,
        Err(_) => {
            warn!(method = %cx.call.method_id, "request payload did not decode");
            return Box::pin(std::future::ready(error_payload(
                remote_error_code::INVALID_PAYLOAD,
            )));
        }
    };

    Box::pin(async move {
        let value = handler(args).await;
        encode_ok(&value).unwrap_or_else(|_| error_payload(remote_error_code::INTERNAL))
    })
}

// ============================================================================
// Result framing
// ============================================================================

/// Encode a successful result: ok marker followed by the encoded value.
pub fn encode_ok<T: Facet<'static>>(
    value: &T,
) -> Result<Payload, facet_postcard::SerializeError> {
    let mut out = vec![RESULT_OK];
    out.extend(facet_postcard::to_vec(value)?);
    Ok(out)
}

/// Encode a user error: err marker, `User` discriminant, encoded error.
pub fn encode_user_error<E: Facet<'static>>(
    error: &E,
) -> Result<Payload, facet_postcard::SerializeError> {
    let mut out = vec![RESULT_ERR, remote_error_code::USER];
    out.extend(facet_postcard::to_vec(error)?);
    Ok(out)
}

/// Build a bare proxy-level error response from a
/// [`remote_error_code`](crate::remote_error_code) discriminant.
pub fn error_payload(discriminant: u8) -> Payload {
    vec![RESULT_ERR, discriminant]
}

/// Decode a response payload into the expected type.
///
/// This is the client half of the result framing: `[0] + value_bytes` for
/// success, `[1, discriminant] + error_bytes` for failure. Malformed frames
/// surface as [`DecodeError`]s rather than being misread as values.
pub fn decode_response<T: Facet<'static>, E: Facet<'static>>(
    payload: &[u8],
) -> Result<T, CallError<E>> {
    if payload.is_empty() {
        return Err(DecodeError::EmptyPayload.into());
    }

    match payload[0] {
        RESULT_OK => facet_postcard::from_slice(&payload[1..]).map_err(CallError::Decode),
        RESULT_ERR => {
            if payload.len() < 2 {
                return Err(DecodeError::TruncatedError.into());
            }
            let remote = match payload[1] {
                remote_error_code::USER => {
                    let user_error: E =
                        facet_postcard::from_slice(&payload[2..]).map_err(CallError::Decode)?;
                    RemoteError::User(user_error)
                }
                remote_error_code::UNKNOWN_METHOD => RemoteError::UnknownMethod,
                remote_error_code::INVALID_PAYLOAD => RemoteError::InvalidPayload,
                remote_error_code::TARGET_DESTROYED => RemoteError::TargetDestroyed,
                remote_error_code::INTERNAL => RemoteError::Internal,
                d => return Err(DecodeError::UnknownErrorDiscriminant(d).into()),
            };
            Err(CallError::Remote(remote))
        }
        d => Err(DecodeError::InvalidResultDiscriminant(d).into()),
    }
}
