//! Hand-expanded glue for a `Directory` interface.
//!
//! Exercises the optional and boxed field representations plus user
//! errors:
//!
//! ```text
//! interface Directory {
//!     lookup(name: str) -> (value: optional str);
//!     store(name: str, value: optional str)
//!         -> (previous: optional boxed str) | DirectoryError;
//!     describe(name: str, want_length: bool)
//!         -> (value: optional str, length: requested optional u64);
//! }
//! ```
//!
//! `length` is a requested field: the server only computes it when the
//! request says so, and it travels as absent otherwise.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use facet::Facet;
use parking_lot::Mutex;
use skiff_proxy::{
    Accessor, BoxInvokeFuture, CallError, ClientProxy, Connection, Field, FieldFlags,
    MethodDescriptor, MethodEntry, Payload, ServerContext, invoke_call, invoke_call_infallible,
};
use skiff_wire::CapabilityId;

/// Error a directory implementation may raise on writes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
pub enum DirectoryError {
    /// The directory is at capacity.
    Full = 0,
}

/// A name-to-value mapping driven from the far side of a connection.
pub trait Directory: Send + Sync + 'static {
    /// Look up a name; absent entries are `None`.
    fn lookup(&self, name: String) -> impl Future<Output = Option<String>> + Send;

    /// Store (`Some`) or clear (`None`) an entry, returning the previous
    /// value.
    fn store(
        &self,
        name: String,
        value: Option<String>,
    ) -> impl Future<Output = Result<Option<Box<String>>, DirectoryError>> + Send;

    /// Look up a name; compute the value's length only if asked to.
    fn describe(
        &self,
        name: String,
        want_length: bool,
    ) -> impl Future<Output = (Option<String>, Option<u64>)> + Send;
}

// ============================================================================
// Descriptors
// ============================================================================

static LOOKUP_FIELDS: [Accessor; 2] = [
    Accessor::new(Field::new("name", 0), FieldFlags::IN),
    Accessor::new(
        Field::new("value", 1),
        FieldFlags::OUT.union(FieldFlags::OPTIONAL),
    ),
];

/// `Directory::lookup`.
pub static LOOKUP: MethodDescriptor = MethodDescriptor::new(1, "directory.lookup", &LOOKUP_FIELDS);

static STORE_FIELDS: [Accessor; 3] = [
    Accessor::new(Field::new("name", 0), FieldFlags::IN),
    Accessor::new(
        Field::new("value", 1),
        FieldFlags::IN.union(FieldFlags::OPTIONAL),
    ),
    Accessor::new(
        Field::new("previous", 2),
        FieldFlags::OUT
            .union(FieldFlags::OPTIONAL)
            .union(FieldFlags::BOXED),
    ),
];

/// `Directory::store`.
pub static STORE: MethodDescriptor = MethodDescriptor::new(2, "directory.store", &STORE_FIELDS);

static DESCRIBE_FIELDS: [Accessor; 4] = [
    Accessor::new(Field::new("name", 0), FieldFlags::IN),
    Accessor::new(Field::new("want_length", 1), FieldFlags::IN),
    Accessor::new(
        Field::new("value", 2),
        FieldFlags::OUT.union(FieldFlags::OPTIONAL),
    ),
    Accessor::new(
        Field::new("length", 3),
        FieldFlags::OUT
            .union(FieldFlags::OPTIONAL)
            .union(FieldFlags::REQUESTED),
    ),
];

/// `Directory::describe`.
pub static DESCRIBE: MethodDescriptor =
    MethodDescriptor::new(3, "directory.describe", &DESCRIBE_FIELDS);

// ============================================================================
// Client side
// ============================================================================

/// Typed client: implements the directory interface by forwarding.
pub struct DirectoryClient {
    proxy: ClientProxy,
}

impl DirectoryClient {
    /// Bind a client to a directory capability.
    pub fn new(capability: CapabilityId, connection: Connection) -> Self {
        Self {
            proxy: ClientProxy::new(capability, connection, false),
        }
    }

    /// Look up a name.
    pub async fn lookup(&self, name: &str) -> Result<Option<String>, CallError> {
        self.proxy.call(&LOOKUP, &(name.to_string(),)).await
    }

    /// Store or clear an entry, returning the previous value.
    pub async fn store(
        &self,
        name: &str,
        value: Option<String>,
    ) -> Result<Option<Box<String>>, CallError<DirectoryError>> {
        self.proxy.call(&STORE, &(name.to_string(), value)).await
    }

    /// Look up a name, optionally asking for the value's length too.
    pub async fn describe(
        &self,
        name: &str,
        want_length: bool,
    ) -> Result<(Option<String>, Option<u64>), CallError> {
        self.proxy
            .call(&DESCRIBE, &(name.to_string(), want_length))
            .await
    }
}

// ============================================================================
// Server side
// ============================================================================

fn invoke_lookup<S: Directory>(
    implementation: Arc<S>,
    cx: ServerContext,
    payload: Payload,
) -> BoxInvokeFuture {
    invoke_call_infallible(cx, payload, move |(name,): (String,)| async move {
        implementation.lookup(name).await
    })
}

fn invoke_store<S: Directory>(
    implementation: Arc<S>,
    cx: ServerContext,
    payload: Payload,
) -> BoxInvokeFuture {
    invoke_call(
        cx,
        payload,
        move |(name, value): (String, Option<String>)| async move {
            implementation.store(name, value).await
        },
    )
}

fn invoke_describe<S: Directory>(
    implementation: Arc<S>,
    cx: ServerContext,
    payload: Payload,
) -> BoxInvokeFuture {
    invoke_call_infallible(
        cx,
        payload,
        move |(name, want_length): (String, bool)| async move {
            implementation.describe(name, want_length).await
        },
    )
}

/// Method table for a directory implementation.
pub fn directory_methods<S: Directory>() -> Vec<MethodEntry<S>> {
    vec![
        MethodEntry::new(&LOOKUP, invoke_lookup::<S>),
        MethodEntry::new(&STORE, invoke_store::<S>),
        MethodEntry::new(&DESCRIBE, invoke_describe::<S>),
    ]
}

// ============================================================================
// A native implementation to wrap
// ============================================================================

/// In-memory directory with a fixed capacity.
pub struct MapDirectory {
    entries: Mutex<HashMap<String, String>>,
    capacity: usize,
    length_computations: std::sync::atomic::AtomicUsize,
}

impl MapDirectory {
    /// Create a directory holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            length_computations: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// How many times a length was actually computed. Lets tests pin down
    /// that unrequested fields are never evaluated.
    pub fn length_computations(&self) -> usize {
        self.length_computations
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Directory for MapDirectory {
    async fn lookup(&self, name: String) -> Option<String> {
        self.entries.lock().get(&name).cloned()
    }

    async fn store(
        &self,
        name: String,
        value: Option<String>,
    ) -> Result<Option<Box<String>>, DirectoryError> {
        let mut entries = self.entries.lock();
        let previous = match value {
            Some(value) => {
                if !entries.contains_key(&name) && entries.len() >= self.capacity {
                    return Err(DirectoryError::Full);
                }
                entries.insert(name, value)
            }
            None => entries.remove(&name),
        };
        Ok(previous.map(Box::new))
    }

    async fn describe(&self, name: String, want_length: bool) -> (Option<String>, Option<u64>) {
        let value = self.entries.lock().get(&name).cloned();
        let length = if want_length {
            self.length_computations
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            value.as_ref().map(|v| v.len() as u64)
        } else {
            None
        };
        (value, length)
    }
}
