//! Signing-key capability and the Ed25519 provider behind it.
//!
//! The ledger never touches key material directly. Transactions and
//! validators talk to a [`SigningKey`], which can always verify and can sign
//! only when the private half is present on this node.

use crate::error::ErrorKind;
use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey as DalekSigningKey, Verifier, VerifyingKey,
};
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;

/// Length in bytes of the identifier derived from a public key.
pub const KEY_ID_LEN: usize = 20;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("key {0} holds no private half and cannot sign")]
    CannotSign(String),
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::CannotSign(_) | CryptoError::VerificationFailed => {
                ErrorKind::PermissionDenied
            }
            _ => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// An asymmetric keypair capability.
pub trait SigningKey: Send + Sync {
    /// Stable identifier derived from the public key.
    fn id(&self) -> String;

    /// Raw public key bytes.
    fn public_key(&self) -> Vec<u8>;

    /// Whether the private half is available.
    fn can_sign(&self) -> bool;

    /// Sign a message.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// Verify a signature over `message` against this key.
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

/// Derive the textual key identifier: `0x` + the first 20 bytes of the
/// Blake3 hash of the public key.
pub fn key_id(public_key: &[u8]) -> String {
    let digest = blake3::hash(public_key);
    format!("0x{}", hex::encode(&digest.as_bytes()[..KEY_ID_LEN]))
}

/// Verify an Ed25519 signature given only raw public key bytes.
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = parse_public_key(public_key) else {
        return false;
    };
    verify_with(&key, message, signature)
}

fn parse_public_key(bytes: &[u8]) -> Result<VerifyingKey> {
    let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&arr).map_err(|_| CryptoError::InvalidPublicKey)
}

fn verify_with(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(sig) = DalekSignature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}

/// Ed25519 implementation of [`SigningKey`].
#[derive(Clone)]
pub struct Ed25519Key {
    signing_key: Option<DalekSigningKey>,
    verifying_key: VerifyingKey,
}

impl Ed25519Key {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let signing_key = DalekSigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key: Some(signing_key),
            verifying_key,
        }
    }

    /// Create a keypair from a private key (32 bytes).
    pub fn from_private_key(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPrivateKey)?;
        let signing_key = DalekSigningKey::from_bytes(&arr);
        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            signing_key: Some(signing_key),
            verifying_key,
        })
    }

    /// A verify-only key for a remote party.
    pub fn from_public_key(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            signing_key: None,
            verifying_key: parse_public_key(bytes)?,
        })
    }

    /// Strip the private half.
    pub fn public_only(&self) -> Self {
        Self {
            signing_key: None,
            verifying_key: self.verifying_key,
        }
    }

    /// Get the private key bytes, if held.
    pub fn private_key(&self) -> Option<[u8; 32]> {
        self.signing_key.as_ref().map(DalekSigningKey::to_bytes)
    }
}

impl SigningKey for Ed25519Key {
    fn id(&self) -> String {
        key_id(self.verifying_key.as_bytes())
    }

    fn public_key(&self) -> Vec<u8> {
        self.verifying_key.to_bytes().to_vec()
    }

    fn can_sign(&self) -> bool {
        self.signing_key.is_some()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| CryptoError::CannotSign(self.id()))?;
        Ok(key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        verify_with(&self.verifying_key, message, signature)
    }
}

impl fmt::Debug for Ed25519Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Key")
            .field("id", &self.id())
            .field("can_sign", &self.can_sign())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = Ed25519Key::generate();
        let sig = key.sign(b"hello world").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(key.verify(b"hello world", &sig));
        assert!(verify_signature(&key.public_key(), b"hello world", &sig));
    }

    #[test]
    fn test_wrong_message_fails() {
        let key = Ed25519Key::generate();
        let sig = key.sign(b"hello").unwrap();
        assert!(!key.verify(b"world", &sig));
    }

    #[test]
    fn test_wrong_key_fails() {
        let k1 = Ed25519Key::generate();
        let k2 = Ed25519Key::generate();
        let sig = k1.sign(b"hello").unwrap();
        assert!(!k2.verify(b"hello", &sig));
    }

    #[test]
    fn test_malformed_signature_rejected() {
        let key = Ed25519Key::generate();
        assert!(!key.verify(b"hello", &[1, 2, 3]));
        assert!(!verify_signature(&[0u8; 5], b"hello", &[0u8; 64]));
    }

    #[test]
    fn test_public_only_cannot_sign() {
        let key = Ed25519Key::generate();
        let public = Ed25519Key::from_public_key(&key.public_key()).unwrap();
        assert!(!public.can_sign());
        assert!(matches!(public.sign(b"x"), Err(CryptoError::CannotSign(_))));

        let sig = key.sign(b"x").unwrap();
        assert!(public.verify(b"x", &sig));
        assert_eq!(public.id(), key.id());
        assert_eq!(key.public_only().id(), key.id());
    }

    #[test]
    fn test_id_is_deterministic() {
        let key = Ed25519Key::generate();
        let restored = Ed25519Key::from_private_key(&key.private_key().unwrap()).unwrap();
        assert_eq!(key.id(), restored.id());
        assert!(key.id().starts_with("0x"));
        assert_eq!(key.id().len(), 2 + KEY_ID_LEN * 2);
    }

    #[test]
    fn test_bad_private_key_length() {
        assert!(matches!(
            Ed25519Key::from_private_key(&[0u8; 7]),
            Err(CryptoError::InvalidPrivateKey)
        ));
    }
}
