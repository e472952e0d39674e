//! Server proxy base.
//!
//! A [`ServerProxy`] wraps a native implementation object and answers
//! forwarded calls for one capability: decode per the method's accessors,
//! invoke through the method table, encode the result back.

use std::sync::Arc;

use parking_lot::Mutex;
use skiff_wire::{MethodId, Payload};

use crate::errors::remote_error_code;
use crate::method::error_payload;
use crate::{
    BoxInvokeFuture, CallContext, Connection, Dispatch, MethodEntry, ProxyContext, ServerContext,
};

/// How a server proxy holds its implementation.
///
/// `Owned` proxies wrap a value transferred by ownership: their teardown is
/// sufficient to release the native resource. `Borrowed` proxies wrap an
/// object whose lifetime is managed elsewhere; the connection's close-hook
/// mechanism must destroy the proxy at the right native-side boundary,
/// since the far side has no other signal that the object ceased to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplOwnership {
    /// Sole owner; dropping the proxy releases the implementation.
    Owned,
    /// Shared with native code that outlives this proxy.
    Borrowed,
}

/// Base for server-side proxies: receives calls, invokes the wrapped
/// native implementation.
///
/// `S` is the concrete implementation type; the per-interface glue builds
/// the method table binding each method ID to an invoke function for `S`.
/// Multiple in-flight requests may invoke the implementation concurrently;
/// serializing them, where needed, is the implementation's business.
pub struct ServerProxy<S> {
    /// Released by `invoke_destroy` or drop, whichever comes first.
    implementation: Mutex<Option<Arc<S>>>,
    ownership: ImplOwnership,
    context: ProxyContext,
    methods: Vec<MethodEntry<S>>,
}

impl<S: Send + Sync + 'static> ServerProxy<S> {
    /// Wrap an implementation transferred by ownership.
    pub fn owned(implementation: S, connection: Connection, methods: Vec<MethodEntry<S>>) -> Self {
        Self::build(
            Arc::new(implementation),
            ImplOwnership::Owned,
            connection,
            methods,
        )
    }

    /// Wrap an already-shared implementation, transferring the caller's
    /// handle. Still `Owned`: the proxy's teardown drops that handle.
    pub fn from_shared(
        implementation: Arc<S>,
        connection: Connection,
        methods: Vec<MethodEntry<S>>,
    ) -> Self {
        Self::build(implementation, ImplOwnership::Owned, connection, methods)
    }

    /// Wrap an implementation owned elsewhere. The caller must arrange a
    /// close hook that destroys this proxy when the native object goes.
    pub fn borrowed(
        implementation: Arc<S>,
        connection: Connection,
        methods: Vec<MethodEntry<S>>,
    ) -> Self {
        Self::build(implementation, ImplOwnership::Borrowed, connection, methods)
    }

    fn build(
        implementation: Arc<S>,
        ownership: ImplOwnership,
        connection: Connection,
        methods: Vec<MethodEntry<S>>,
    ) -> Self {
        Self {
            implementation: Mutex::new(Some(implementation)),
            ownership,
            context: ProxyContext::new(connection),
            methods,
        }
    }

    /// How this proxy holds its implementation.
    pub fn ownership(&self) -> ImplOwnership {
        self.ownership
    }

    /// The proxy's connection binding.
    pub fn context(&self) -> &ProxyContext {
        &self.context
    }

    /// The wrapped implementation, if not yet released.
    pub fn implementation(&self) -> Option<Arc<S>> {
        self.implementation.lock().clone()
    }

    /// Release the implementation early, without destroying the proxy.
    ///
    /// Idempotent: calling it again (including the implicit call at drop)
    /// does nothing. Requests dispatched afterwards answer the
    /// `TargetDestroyed` error instead of touching a released object.
    pub fn invoke_destroy(&self) {
        if self.implementation.lock().take().is_some() {
            debug!("server proxy released its implementation");
        }
    }

    fn entry(&self, id: MethodId) -> Option<&MethodEntry<S>> {
        self.methods.iter().find(|e| e.descriptor.id == id)
    }
}

impl<S: Send + Sync + 'static> Dispatch for ServerProxy<S> {
    fn dispatch(&self, cx: CallContext, payload: Payload) -> BoxInvokeFuture {
        let Some(implementation) = self.implementation.lock().clone() else {
            warn!(capability = %cx.target, method = %cx.method_id, "request for destroyed target");
            return Box::pin(std::future::ready(error_payload(
                remote_error_code::TARGET_DESTROYED,
            )));
        };
        match self.entry(cx.method_id) {
            Some(entry) => {
                trace!(
                    capability = %cx.target,
                    method = entry.descriptor.name,
                    "dispatching request"
                );
                let server_cx = ServerContext::new(cx, self.context.connection.clone());
                (entry.invoke)(implementation, server_cx, payload)
            }
            None => {
                warn!(capability = %cx.target, method = %cx.method_id, "unknown method");
                Box::pin(std::future::ready(error_payload(
                    remote_error_code::UNKNOWN_METHOD,
                )))
            }
        }
    }
}

impl<S> Drop for ServerProxy<S> {
    fn drop(&mut self) {
        // Covers the case where invoke_destroy was never called; taking an
        // already-empty option keeps the release single-shot.
        self.implementation.get_mut().take();
    }
}

impl<S> std::fmt::Debug for ServerProxy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProxy")
            .field("ownership", &self.ownership)
            .field("destroyed", &self.implementation.lock().is_none())
            .field("methods", &self.methods.len())
            .finish()
    }
}
