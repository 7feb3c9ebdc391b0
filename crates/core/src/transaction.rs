//! Generic, signed transactions.

use crate::codec::{CodecError, Decoder, Encoder};
use crate::crypto::{CryptoError, SigningKey};
use crate::error::ErrorKind;
use crate::payload::Payload;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest accepted priority.
pub const MIN_PRIORITY: i16 = 0;
/// Highest accepted priority.
pub const MAX_PRIORITY: i16 = 255;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction id is empty")]
    EmptyId,

    #[error("transaction {0} has an empty payload")]
    EmptyPayload(String),

    #[error("transaction {0} is not signed")]
    MissingSignature(String),

    #[error("priority {0} outside 0..=255")]
    PriorityOutOfRange(i16),

    #[error("transaction {0} is already signed")]
    AlreadySigned(String),

    #[error("signature verification failed for transaction {0}")]
    VerificationFailed(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransactionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransactionError::AlreadySigned(_) => ErrorKind::AlreadyExists,
            TransactionError::VerificationFailed(_) => ErrorKind::PermissionDenied,
            TransactionError::Crypto(e) => e.kind(),
            TransactionError::Codec(_) | TransactionError::Json(_) => ErrorKind::Io,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransactionError>;

/// A timestamped, prioritized unit of work wrapping an application payload.
///
/// The timestamp is captured at construction. The signature is attached once
/// through [`Transaction::sign`]; a second attempt is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "T: Payload")]
pub struct Transaction<T> {
    pub timestamp: Timestamp,
    pub priority: i16,
    pub id: String,
    pub payload: T,
    #[serde(with = "crate::serde_hex")]
    pub signature: Vec<u8>,
}

impl<T: Payload> Transaction<T> {
    /// Create a new unsigned transaction stamped with the current time.
    pub fn new(id: impl Into<String>, payload: T, priority: i16) -> Self {
        Self {
            timestamp: Timestamp::now(),
            priority,
            id: id.into(),
            payload,
            signature: Vec::new(),
        }
    }

    /// The string that is signed and hashed into merkle leaves:
    /// seconds, nanoseconds, priority, id and payload with no delimiters.
    pub fn canonical_string(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.timestamp.secs,
            self.timestamp.nanos,
            self.priority,
            self.id,
            self.payload.canonical_string()
        )
    }

    /// Sign the transaction with the given key.
    pub fn sign(&mut self, key: &dyn SigningKey) -> Result<()> {
        if self.is_signed() {
            return Err(TransactionError::AlreadySigned(self.id.clone()));
        }
        self.signature = key.sign(self.canonical_string().as_bytes())?;
        Ok(())
    }

    /// Create a signed transaction.
    pub fn signed(mut self, key: &dyn SigningKey) -> Result<Self> {
        self.sign(key)?;
        Ok(self)
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Verify the transaction signature.
    pub fn verify(&self, key: &dyn SigningKey) -> Result<()> {
        if !self.is_signed() {
            return Err(TransactionError::MissingSignature(self.id.clone()));
        }
        if key.verify(self.canonical_string().as_bytes(), &self.signature) {
            Ok(())
        } else {
            Err(TransactionError::VerificationFailed(self.id.clone()))
        }
    }

    /// Structural validity, reporting the first failed check.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(TransactionError::EmptyId);
        }
        if self.payload.canonical_string().is_empty() {
            return Err(TransactionError::EmptyPayload(self.id.clone()));
        }
        if !self.is_signed() {
            return Err(TransactionError::MissingSignature(self.id.clone()));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(TransactionError::PriorityOutOfRange(self.priority));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Encode to the binary wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode_into(&mut enc)?;
        Ok(enc.finish())
    }

    pub(crate) fn encode_into(&self, enc: &mut Encoder) -> std::result::Result<(), CodecError> {
        enc.put_i64(self.timestamp.secs)
            .put_u32(self.timestamp.nanos)
            .put_i16(self.priority);
        enc.put_str(&self.id)?;
        enc.put_bytes(&self.payload.encode()?)?;
        enc.put_bytes(&self.signature)?;
        Ok(())
    }

    /// Decode from the binary wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let tx = Self::decode_from(&mut dec)?;
        dec.finish()?;
        Ok(tx)
    }

    pub(crate) fn decode_from(dec: &mut Decoder<'_>) -> std::result::Result<Self, CodecError> {
        let secs = dec.i64()?;
        let nanos = dec.u32()?;
        let priority = dec.i16()?;
        let id = dec.string()?;
        let payload = T::decode(dec.bytes()?)?;
        let signature = dec.bytes()?.to_vec();
        Ok(Self {
            timestamp: Timestamp::new(secs, nanos),
            priority,
            id,
            payload,
            signature,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Ed25519Key;

    fn tx(id: &str) -> Transaction<String> {
        Transaction::new(id, "payload".to_string(), 10)
    }

    #[test]
    fn test_canonical_string_layout() {
        let mut t = tx("tx-1");
        t.timestamp = Timestamp::new(100, 7);
        assert_eq!(t.canonical_string(), "100710tx-1payload");
    }

    #[test]
    fn test_sign_and_verify() {
        let key = Ed25519Key::generate();
        let t = tx("tx-1").signed(&key).unwrap();
        assert!(t.is_signed());
        assert!(t.verify(&key).is_ok());
        assert!(t.is_valid());
    }

    #[test]
    fn test_wrong_key_verification_fails() {
        let k1 = Ed25519Key::generate();
        let k2 = Ed25519Key::generate();
        let t = tx("tx-1").signed(&k1).unwrap();
        assert!(matches!(
            t.verify(&k2),
            Err(TransactionError::VerificationFailed(_))
        ));
    }

    #[test]
    fn test_signature_attached_once() {
        let key = Ed25519Key::generate();
        let mut t = tx("tx-1");
        t.sign(&key).unwrap();
        let err = t.sign(&key).unwrap_err();
        assert!(matches!(err, TransactionError::AlreadySigned(_)));
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_verify_only_key_cannot_sign() {
        let key = Ed25519Key::generate().public_only();
        let mut t = tx("tx-1");
        let err = t.sign(&key).unwrap_err();
        assert!(matches!(err, TransactionError::Crypto(CryptoError::CannotSign(_))));
        assert!(!t.is_signed());
    }

    #[test]
    fn test_validity_rules() {
        let key = Ed25519Key::generate();

        assert!(matches!(tx("tx").validate(), Err(TransactionError::MissingSignature(_))));

        let empty_id = tx("").signed(&key).unwrap();
        assert!(matches!(empty_id.validate(), Err(TransactionError::EmptyId)));

        let empty_payload = Transaction::new("tx", String::new(), 1).signed(&key).unwrap();
        assert!(matches!(
            empty_payload.validate(),
            Err(TransactionError::EmptyPayload(_))
        ));

        for bad in [-1, 256] {
            let t = Transaction::new("tx", "p".to_string(), bad).signed(&key).unwrap();
            assert!(matches!(
                t.validate(),
                Err(TransactionError::PriorityOutOfRange(p)) if p == bad
            ));
        }
        for good in [0, 255] {
            let t = Transaction::new("tx", "p".to_string(), good).signed(&key).unwrap();
            assert!(t.is_valid());
        }
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let key = Ed25519Key::generate();
        let mut t = tx("tx-1").signed(&key).unwrap();
        t.payload = "other".into();
        assert!(t.verify(&key).is_err());
    }

    #[test]
    fn test_binary_layout() {
        let key = Ed25519Key::generate();
        let mut t = Transaction::new("ab", "xyz".to_string(), 3);
        t.timestamp = Timestamp::new(1, 2);
        t.sign(&key).unwrap();

        let bytes = t.to_bytes().unwrap();
        assert_eq!(&bytes[..8], &1i64.to_le_bytes());
        assert_eq!(&bytes[8..12], &2u32.to_le_bytes());
        assert_eq!(&bytes[12..14], &3i16.to_le_bytes());
        assert_eq!(&bytes[14..18], &2u32.to_le_bytes());
        assert_eq!(&bytes[18..20], b"ab");
        assert_eq!(&bytes[20..24], &3u32.to_le_bytes());
        assert_eq!(&bytes[24..27], b"xyz");
        assert_eq!(&bytes[27..31], &64u32.to_le_bytes());
        assert_eq!(bytes.len(), 31 + 64);

        assert_eq!(Transaction::<String>::from_bytes(&bytes).unwrap(), t);
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let key = Ed25519Key::generate();
        let bytes = tx("tx-1").signed(&key).unwrap().to_bytes().unwrap();
        let err = Transaction::<String>::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_json_field_names() {
        let key = Ed25519Key::generate();
        let t = tx("tx-\"quoted\"\n").signed(&key).unwrap();
        let json = t.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        for field in ["timestamp", "priority", "id", "payload", "signature"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["signature"].as_str().unwrap(), hex::encode(&t.signature));
        assert_eq!(Transaction::<String>::from_json(&json).unwrap(), t);
    }
}
