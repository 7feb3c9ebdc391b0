//! The application payload carried by transactions.

use crate::codec::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A value an application stores in the ledger.
///
/// `canonical_string` feeds both signing and merkle leaves, so it must be
/// deterministic and unambiguous: the transaction's canonical form appends it
/// to the other fields with no delimiter.
///
/// The binary codec defaults to bincode over the serde representation;
/// override `encode`/`decode` to keep an existing on-disk layout.
pub trait Payload: Clone + Serialize + DeserializeOwned {
    fn canonical_string(&self) -> String;

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Payload(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Payload(e.to_string()))
    }
}

impl Payload for String {
    fn canonical_string(&self) -> String {
        self.clone()
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.as_bytes().to_vec())
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        value: u32,
    }

    impl Payload for Reading {
        fn canonical_string(&self) -> String {
            format!("{}={}", self.sensor, self.value)
        }
    }

    #[test]
    fn test_string_payload_is_raw_utf8() {
        let p = "hello".to_string();
        assert_eq!(p.encode().unwrap(), b"hello");
        assert_eq!(String::decode(b"hello").unwrap(), "hello");
    }

    #[test]
    fn test_default_codec_uses_bincode() {
        let r = Reading {
            sensor: "t1".into(),
            value: 21,
        };
        let bytes = r.encode().unwrap();
        assert_eq!(Reading::decode(&bytes).unwrap(), r);
        assert_eq!(r.canonical_string(), "t1=21");
    }

    #[test]
    fn test_default_decode_rejects_garbage() {
        assert!(matches!(Reading::decode(&[0xFF]), Err(CodecError::Payload(_))));
    }
}
