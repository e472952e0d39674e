use facet::Facet;

use crate::{CapabilityId, MethodId, Payload, RequestId};

/// A forwarded method call, client proxy to server proxy.
///
/// The payload carries the encoded tuple of the method's `in` fields, in
/// declaration order. Fields the method marks `optional` are encoded as
/// `Option<T>`; `boxed` fields as an owned indirection. The proxy layer owns
/// that framing, the transport just moves the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct Request {
    /// Capability the call targets.
    pub target: CapabilityId,

    /// Unique within the sending connection; pairs the response back up.
    pub request_id: RequestId,

    /// Method being invoked on the target.
    pub method: MethodId,

    /// Encoded `in` fields.
    pub payload: Payload,
}

/// The answer to a [`Request`].
///
/// The first payload byte is [`RESULT_OK`](crate::RESULT_OK) or
/// [`RESULT_ERR`](crate::RESULT_ERR); the rest is the encoded result value
/// or error. Encoding and decoding of that framing lives in the proxy layer
/// so every transport agrees on it.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct Response {
    /// Echoes the request this answers.
    pub request_id: RequestId,

    /// Result framing byte followed by the encoded value or error.
    pub payload: Payload,
}
