//! Client proxy base.
//!
//! A [`ClientProxy`] is the local stand-in for an object living on the far
//! side of a connection. Typed interface wrappers embed one and turn each
//! native method into a [`ClientProxy::call`] with the method's descriptor.
//!
//! Lifetime contract:
//! - construction registers a self-cleanup callback with the connection, so
//!   a connection torn down first invalidates the proxy instead of leaving
//!   it holding a dead reference
//! - normal drop removes that callback again
//! - an invalidated proxy never calls into the connection; its calls fail
//!   with `ConnectionClosed`

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use facet::Facet;
use skiff_wire::CapabilityId;

use crate::{CallError, CleanupHandle, Connection, MethodDescriptor, decode_response};

/// Context data associated with proxy client and server objects.
///
/// Binds a proxy to the connection that carries its calls. The proxy
/// references the connection through a shared handle; it does not own it.
#[derive(Debug, Clone)]
pub struct ProxyContext {
    /// The connection carrying this proxy's calls.
    pub connection: Connection,
}

impl ProxyContext {
    /// Create a context for the given connection.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

/// Base for client-side proxies: forwards calls to a remote capability.
pub struct ClientProxy {
    capability: CapabilityId,
    context: ProxyContext,
    /// Tearing down this proxy also tears down the connection.
    destroy_connection: bool,
    /// Handle to the self-cleanup callback registered with the connection.
    cleanup: Option<CleanupHandle>,
    /// Set by the cleanup callback when the connection dies before us.
    invalidated: Arc<AtomicBool>,
    /// Optional destroy lifecycle hook, sent as a final remote call so the
    /// far side can release paired resources deterministically.
    destroy: Option<&'static MethodDescriptor>,
    destroy_sent: AtomicBool,
}

impl ClientProxy {
    /// Create a proxy for `capability`, bound to `connection`.
    ///
    /// With `destroy_connection` set, dropping the proxy also closes the
    /// connection (for proxies that stand for the connection's root object).
    pub fn new(capability: CapabilityId, connection: Connection, destroy_connection: bool) -> Self {
        let invalidated = Arc::new(AtomicBool::new(false));
        let flag = invalidated.clone();
        let cleanup = connection.register_cleanup(move || {
            flag.store(true, Ordering::SeqCst);
        });
        trace!(capability = %capability, "client proxy created");
        Self {
            capability,
            context: ProxyContext::new(connection),
            destroy_connection,
            cleanup: Some(cleanup),
            invalidated,
            destroy: None,
            destroy_sent: AtomicBool::new(false),
        }
    }

    /// Attach the interface's destroy lifecycle hook.
    ///
    /// Interfaces opt into the hook; those without one tear down locally
    /// and let the far side notice through its own channels.
    pub fn with_destroy(mut self, descriptor: &'static MethodDescriptor) -> Self {
        self.destroy = Some(descriptor);
        self
    }

    /// The remote capability this proxy stands for.
    pub fn capability(&self) -> CapabilityId {
        self.capability
    }

    /// The proxy's connection binding.
    pub fn context(&self) -> &ProxyContext {
        &self.context
    }

    /// The connection carrying this proxy's calls.
    pub fn connection(&self) -> &Connection {
        &self.context.connection
    }

    /// True once the connection was torn down under this proxy.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// Forward one method call and wait for its result.
    ///
    /// `args` is the tuple of the method's `in` fields in declaration
    /// order, as named by the descriptor's accessor table; `optional`
    /// fields travel as `Option<T>` and `boxed` fields as `Box<T>`. The
    /// result decodes the same way from the `out` side of the table.
    pub async fn call<Args, Ok, Err>(
        &self,
        descriptor: &'static MethodDescriptor,
        args: &Args,
    ) -> Result<Ok, CallError<Err>>
    where
        Args: Facet<'static>,
        Ok: Facet<'static>,
        Err: Facet<'static>,
    {
        if self.is_invalidated() {
            return Err(CallError::ConnectionClosed);
        }
        let payload = facet_postcard::to_vec(args).map_err(CallError::Encode)?;
        trace!(
            capability = %self.capability,
            method = descriptor.name,
            "forwarding call"
        );
        let response = self
            .context
            .connection
            .call(self.capability, descriptor.id, payload)
            .await?;
        decode_response(&response)
    }

    /// Send the destroy lifecycle hook now, deterministically.
    ///
    /// Safe to call more than once; only the first call goes out. Proxies
    /// without a destroy hook return `Ok(())` untouched. After this, drop
    /// will not send the hook again.
    pub async fn destroy(&self) -> Result<(), CallError> {
        let Some(descriptor) = self.destroy else {
            return Ok(());
        };
        if self.destroy_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.is_invalidated() {
            return Err(CallError::ConnectionClosed);
        }
        self.call::<(), (), Infallible>(descriptor, &()).await
    }
}

impl Drop for ClientProxy {
    fn drop(&mut self) {
        if !self.is_invalidated() {
            // The connection is still alive: take our callback back out so
            // teardown does not poke a freed proxy.
            if let Some(handle) = self.cleanup.take() {
                self.context.connection.unregister_cleanup(handle);
            }
            if let Some(descriptor) = self.destroy
                && !self.destroy_sent.swap(true, Ordering::SeqCst)
            {
                self.context
                    .connection
                    .notify_destroy(self.capability, descriptor.id);
            }
        }
        trace!(capability = %self.capability, "client proxy dropped");
        if self.destroy_connection {
            self.context.connection.close();
        }
    }
}

impl std::fmt::Debug for ClientProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProxy")
            .field("capability", &self.capability)
            .field("destroy_connection", &self.destroy_connection)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}
