//! Capability registry for the in-process transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use skiff_proxy::Dispatch;
use skiff_wire::CapabilityId;

/// Maps capability IDs to the dispatchers that answer for them.
///
/// Stands in for the far side of a real transport: exporting an object
/// mints a capability, revoking one drops the dispatcher (and with it any
/// server proxy it wraps). Capability 1 is the first minted; 0 stays
/// reserved for the bootstrap convention.
#[derive(Default)]
pub struct Router {
    targets: Mutex<HashMap<CapabilityId, Arc<dyn Dispatch>>>,
    next: AtomicU64,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    /// Export a dispatcher, minting a fresh capability for it.
    pub fn export(&self, dispatch: Arc<dyn Dispatch>) -> CapabilityId {
        let id = CapabilityId::new(self.next.fetch_add(1, Ordering::Relaxed));
        self.targets.lock().insert(id, dispatch);
        debug!(capability = %id, "capability exported");
        id
    }

    /// Export a dispatcher under a caller-chosen capability.
    ///
    /// For wiring up the bootstrap object both sides agree on in advance.
    pub fn export_as(&self, id: CapabilityId, dispatch: Arc<dyn Dispatch>) {
        self.targets.lock().insert(id, dispatch);
    }

    /// Look up the dispatcher for a capability.
    pub fn resolve(&self, id: CapabilityId) -> Option<Arc<dyn Dispatch>> {
        self.targets.lock().get(&id).cloned()
    }

    /// Drop a capability's dispatcher. Returns true if it was present.
    ///
    /// Close hooks use this to destroy a borrowed object's server proxy at
    /// the native-side lifetime boundary.
    pub fn revoke(&self, id: CapabilityId) -> bool {
        let removed = self.targets.lock().remove(&id).is_some();
        if removed {
            debug!(capability = %id, "capability revoked");
        }
        removed
    }

    /// Number of live capabilities.
    pub fn len(&self) -> usize {
        self.targets.lock().len()
    }

    /// True if nothing is exported.
    pub fn is_empty(&self) -> bool {
        self.targets.lock().is_empty()
    }
}
