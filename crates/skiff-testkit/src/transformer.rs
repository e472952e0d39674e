//! Hand-expanded glue for a `Transformer` interface.
//!
//! Exercises callback parameters: the caller passes a function value, the
//! far side invokes it element by element through a
//! [`RemoteCallback`](skiff_proxy::RemoteCallback) built on the server's
//! own connection.
//!
//! ```text
//! interface Transformer {
//!     map(values: [i32], op: callback(i32) -> i32)
//!         -> (mapped: [i32]) | TransformError;
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use facet::Facet;
use skiff_proxy::{
    Accessor, BoxInvokeFuture, CallError, Callback, ClientProxy, Connection, Field, FieldFlags,
    MethodDescriptor, MethodEntry, Payload, RemoteCallback, ServerContext, invoke_call,
};
use skiff_wire::CapabilityId;

/// Error a transformer raises when the supplied callback fails.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
pub enum TransformError {
    /// The callback could not be invoked.
    CallbackFailed = 0,
}

/// Applies a caller-supplied function over values.
pub trait Transformer: Send + Sync + 'static {
    /// Apply `op` to every value, in order.
    fn map<C>(
        &self,
        values: Vec<i32>,
        op: C,
    ) -> impl Future<Output = Result<Vec<i32>, TransformError>> + Send
    where
        C: Callback<(i32,), i32>;
}

// ============================================================================
// Descriptors
// ============================================================================

static MAP_FIELDS: [Accessor; 3] = [
    Accessor::new(Field::new("values", 0), FieldFlags::IN),
    Accessor::new(Field::new("op", 1), FieldFlags::IN),
    Accessor::new(Field::new("mapped", 2), FieldFlags::OUT),
];

/// `Transformer::map`.
pub static MAP: MethodDescriptor = MethodDescriptor::new(1, "transformer.map", &MAP_FIELDS);

// ============================================================================
// Client side
// ============================================================================

/// Typed client: implements the transformer interface by forwarding.
///
/// The callback travels as a capability; the caller exports it (via the
/// router on its own side) and passes the resulting ID here.
pub struct TransformerClient {
    proxy: ClientProxy,
}

impl TransformerClient {
    /// Bind a client to a transformer capability.
    pub fn new(capability: CapabilityId, connection: Connection) -> Self {
        Self {
            proxy: ClientProxy::new(capability, connection, false),
        }
    }

    /// Apply the exported callback `op` to every value.
    pub async fn map(
        &self,
        values: Vec<i32>,
        op: CapabilityId,
    ) -> Result<Vec<i32>, CallError<TransformError>> {
        self.proxy.call(&MAP, &(values, op)).await
    }
}

// ============================================================================
// Server side
// ============================================================================

fn invoke_map<S: Transformer>(
    implementation: Arc<S>,
    cx: ServerContext,
    payload: Payload,
) -> BoxInvokeFuture {
    let connection = cx.connection.clone();
    invoke_call(
        cx,
        payload,
        move |(values, op): (Vec<i32>, CapabilityId)| async move {
            let op = RemoteCallback::<(i32,), i32>::new(op, connection);
            implementation.map(values, op).await
        },
    )
}

/// Method table for a transformer implementation.
pub fn transformer_methods<S: Transformer>() -> Vec<MethodEntry<S>> {
    vec![MethodEntry::new(&MAP, invoke_map::<S>)]
}

// ============================================================================
// A native implementation to wrap
// ============================================================================

/// Transformer that applies the callback one element at a time.
pub struct Mapper;

impl Transformer for Mapper {
    async fn map<C>(&self, values: Vec<i32>, op: C) -> Result<Vec<i32>, TransformError>
    where
        C: Callback<(i32,), i32>,
    {
        let mut mapped = Vec::with_capacity(values.len());
        for value in values {
            let result = op
                .call((value,))
                .await
                .map_err(|_| TransformError::CallbackFailed)?;
            mapped.push(result);
        }
        Ok(mapped)
    }
}
