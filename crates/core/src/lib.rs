//! Ledger primitives for authchain.
//!
//! This crate provides the building blocks every other crate uses:
//! - SHA-256 hashing and the Ed25519 signing-key capability
//! - Merkle trees with inclusion proofs
//! - Generic transactions over an application [`Payload`]
//! - Blocks with hash-chain linkage
//! - The little-endian binary wire format
//! - The shared [`ErrorKind`] taxonomy

pub mod block;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod payload;
mod serde_hex;
pub mod time;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use block::{Block, BlockError, GENESIS_PREVIOUS_HASH};
pub use codec::{CodecError, Decoder, Encoder};
pub use crypto::{key_id, verify_signature, CryptoError, Ed25519Key, SigningKey};
pub use error::ErrorKind;
pub use hash::{is_digest_hex, sha256, sha256_concat, sha256_hex, H256};
pub use merkle::{merkle_root, verify_proof, MerkleTree};
pub use payload::Payload;
pub use time::{now_millis, Timestamp};
pub use transaction::{Transaction, TransactionError, MAX_PRIORITY, MIN_PRIORITY};
