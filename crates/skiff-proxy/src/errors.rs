use std::convert::Infallible;

use facet::Facet;

/// Error encoded in response payloads when a forwarded call fails.
///
/// `User` carries the error the wrapped native implementation raised; the
/// remaining variants are raised by the proxy layer itself before or after
/// the implementation runs. The discriminant is the second payload byte of
/// an error response.
#[repr(u8)]
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub enum RemoteError<E> {
    /// The native implementation on the far side raised this error.
    User(E) = 0,
    /// Method ID not present in the target's method table.
    UnknownMethod = 1,
    /// Request payload could not be decoded into the method's parameters.
    InvalidPayload = 2,
    /// The target capability released its implementation before this call.
    TargetDestroyed = 3,
    /// The far side failed while producing the response.
    Internal = 4,
}

/// Wire discriminants for [`RemoteError`], shared by encode and decode.
///
/// Transports and glue that synthesize error responses (an unknown target,
/// say) build them from these via
/// [`error_payload`](crate::error_payload).
pub mod remote_error_code {
    pub const USER: u8 = 0;
    pub const UNKNOWN_METHOD: u8 = 1;
    pub const INVALID_PAYLOAD: u8 = 2;
    pub const TARGET_DESTROYED: u8 = 3;
    pub const INTERNAL: u8 = 4;
}

impl<E> RemoteError<E> {
    /// Map the user error type to a different type.
    pub fn map_user<F, E2>(self, f: F) -> RemoteError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            RemoteError::User(e) => RemoteError::User(f(e)),
            RemoteError::UnknownMethod => RemoteError::UnknownMethod,
            RemoteError::InvalidPayload => RemoteError::InvalidPayload,
            RemoteError::TargetDestroyed => RemoteError::TargetDestroyed,
            RemoteError::Internal => RemoteError::Internal,
        }
    }
}

/// Connection-level failure: the request never produced a response.
///
/// Distinct from [`RemoteError`] so callers can always tell "the far side
/// raised an error" apart from "the call may never have been delivered."
#[derive(Debug)]
pub enum TransportError {
    /// The transport failed while delivering the request or response.
    Io(std::io::Error),
    /// The connection was closed before a response arrived.
    ConnectionClosed,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "transport i/o error: {e}"),
            TransportError::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Error from making an outgoing call through a client proxy.
///
/// This flattens the nested `Result<Result<T, RemoteError<E>>, TransportError>`
/// pattern into a single `Result<T, CallError<E>>` for better ergonomics.
///
/// The type parameter `E` is the user error type of fallible methods. For
/// infallible methods, use `CallError<Infallible>`.
#[derive(Debug)]
pub enum CallError<E = Infallible> {
    /// The far side answered with an error (user or proxy-level).
    Remote(RemoteError<E>),
    /// Failed to encode the request payload.
    Encode(facet_postcard::SerializeError),
    /// Failed to decode the response value.
    Decode(facet_postcard::DeserializeError),
    /// Malformed response framing.
    Protocol(DecodeError),
    /// The transport failed while the call was in flight.
    Io(std::io::Error),
    /// The connection was closed before a response arrived.
    ConnectionClosed,
}

impl<E> CallError<E> {
    /// Map the user error type to a different type.
    pub fn map_user<F, E2>(self, f: F) -> CallError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            CallError::Remote(remote) => CallError::Remote(remote.map_user(f)),
            CallError::Encode(e) => CallError::Encode(e),
            CallError::Decode(e) => CallError::Decode(e),
            CallError::Protocol(e) => CallError::Protocol(e),
            CallError::Io(e) => CallError::Io(e),
            CallError::ConnectionClosed => CallError::ConnectionClosed,
        }
    }

    /// True if the request may never have reached the far side.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, CallError::Io(_) | CallError::ConnectionClosed)
    }
}

impl<E: std::fmt::Debug> std::fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Remote(e) => write!(f, "remote error: {e:?}"),
            CallError::Encode(e) => write!(f, "encode error: {e}"),
            CallError::Decode(e) => write!(f, "decode error: {e}"),
            CallError::Protocol(e) => write!(f, "protocol error: {e}"),
            CallError::Io(e) => write!(f, "transport i/o error: {e}"),
            CallError::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl<E: std::fmt::Debug> std::error::Error for CallError<E> {}

impl<E> From<TransportError> for CallError<E> {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Io(e) => CallError::Io(e),
            TransportError::ConnectionClosed => CallError::ConnectionClosed,
        }
    }
}

/// Error decoding a response payload's result framing.
#[derive(Debug)]
pub enum DecodeError {
    /// Empty response payload.
    EmptyPayload,
    /// Error response missing its discriminant byte.
    TruncatedError,
    /// Unknown [`RemoteError`] discriminant.
    UnknownErrorDiscriminant(u8),
    /// First payload byte was neither the ok nor the err marker.
    InvalidResultDiscriminant(u8),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::EmptyPayload => write!(f, "empty response payload"),
            DecodeError::TruncatedError => write!(f, "truncated error response"),
            DecodeError::UnknownErrorDiscriminant(d) => {
                write!(f, "unknown remote error discriminant: {d}")
            }
            DecodeError::InvalidResultDiscriminant(d) => {
                write!(f, "invalid result discriminant: {d}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl<E> From<DecodeError> for CallError<E> {
    fn from(e: DecodeError) -> Self {
        CallError::Protocol(e)
    }
}
