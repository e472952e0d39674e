#![deny(unsafe_code)]

//! Wire-level types for the skiff proxying layer.
//!
//! These are the types that cross the process boundary: capability, method
//! and request identifiers, plus the [`Request`]/[`Response`] pair a
//! transport round-trips. Payload bytes are opaque at this level; the proxy
//! layer decides how argument and result values are framed inside them.

mod ids;
mod message;

pub use ids::*;
pub use message::*;

/// Opaque payload bytes carried by a request or response.
pub type Payload = Vec<u8>;

/// First payload byte of a successful response.
pub const RESULT_OK: u8 = 0;

/// First payload byte of a failed response; the next byte is the remote
/// error discriminant.
pub const RESULT_ERR: u8 = 1;

/// Well-known method id for invoking a callback capability.
///
/// Callback capabilities expose exactly one operation, so every callback
/// server answers this id rather than carrying a per-interface table.
pub const CALLBACK_CALL: MethodId = MethodId::new(1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips_through_codec() {
        let req = Request {
            target: CapabilityId::new(7),
            request_id: RequestId::new(3),
            method: MethodId::new(0xbeef),
            payload: vec![1, 2, 3],
        };
        let bytes = facet_postcard::to_vec(&req).unwrap();
        let decoded: Request = facet_postcard::from_slice(&bytes).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn ids_display_with_prefixes() {
        assert_eq!(CapabilityId::new(4).to_string(), "cap:4");
        assert_eq!(RequestId::new(9).to_string(), "req:9");
        assert_eq!(MethodId::new(2).to_string(), "method:2");
    }
}
