use serde::{de::DeserializeOwned, Serialize};

use crate::error::ClientError;

/// Converts between domain values and the bytes carried on the wire.
/// Implementations must be deterministic enough that fingerprinting a
/// deserialized key equals fingerprinting the original:
/// two values the server considers equal must serialize to identical
/// bytes, because [`fingerprint`] is a pure function of those bytes.
pub trait Serializer: Clone + Send + Sync + 'static {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ClientError>;
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, ClientError>;
}

/// Default serializer matching the `format: "json"` session option.
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ClientError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A deterministic textual form of serialized key bytes, used as the
/// client-side index into `keyGroups`. Hex
/// encoding is a sufficient canonical stringification of a byte string:
/// it is injective and order-preserving-irrelevant, so any two byte
/// strings that are equal produce identical fingerprints.
pub fn fingerprint(key_bytes: &[u8]) -> String {
    let mut out = String::with_capacity(key_bytes.len() * 2);
    for byte in key_bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_equal_bytes() {
        let a = fingerprint(b"hello");
        let b = fingerprint(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_for_different_bytes() {
        assert_ne!(fingerprint(b"hello"), fingerprint(b"world"));
    }

    #[test]
    fn json_serializer_round_trips() {
        let s = JsonSerializer;
        let bytes = s.serialize(&42u32).unwrap();
        let value: u32 = s.deserialize(&bytes).unwrap();
        assert_eq!(value, 42);
    }
}
