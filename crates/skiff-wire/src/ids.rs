use facet::Facet;

/// Capability ID identifying a remotely-exposed object.
///
/// The far side hands one out whenever a native object is exported across
/// the connection; every request names the capability it targets. Zero is
/// reserved for the bootstrap capability exchanged at connection setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Facet)]
#[repr(transparent)]
pub struct CapabilityId(pub u64);

impl CapabilityId {
    /// The bootstrap capability (always exists on a connection).
    pub const BOOTSTRAP: Self = Self(0);

    /// Create a new capability ID.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for CapabilityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<CapabilityId> for u64 {
    fn from(id: CapabilityId) -> Self {
        id.0
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cap:{}", self.0)
    }
}

/// Request ID identifying an in-flight call.
///
/// Request IDs are unique within a connection and monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Facet)]
#[repr(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Create a new request ID.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<RequestId> for u64 {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

/// Method ID identifying an interface method.
///
/// Assigned by whatever produces the per-interface glue; unique within an
/// interface. The proxy layer only compares them for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Facet)]
#[repr(transparent)]
pub struct MethodId(pub u64);

impl MethodId {
    /// Create a new method ID.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for MethodId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<MethodId> for u64 {
    fn from(id: MethodId) -> Self {
        id.0
    }
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "method:{}", self.0)
    }
}
