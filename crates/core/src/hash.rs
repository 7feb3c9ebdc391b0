//! SHA-256 digests.
//!
//! Ledger hashes travel as lower-case hex strings; block hashes and merkle
//! nodes both come from [`sha256_hex`].

use sha2::{Digest, Sha256};

pub const DIGEST_LEN: usize = 32;

/// Raw SHA-256 output.
pub type H256 = [u8; DIGEST_LEN];

pub fn sha256(data: &[u8]) -> H256 {
    Sha256::digest(data).into()
}

/// Digest of the concatenation of `parts`, without building it.
pub fn sha256_concat(parts: &[&[u8]]) -> H256 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Whether `s` has the shape of a [`sha256_hex`] output.
pub fn is_digest_hex(s: &str) -> bool {
    s.len() == DIGEST_LEN * 2 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_concat_matches_joined_input() {
        assert_eq!(sha256_concat(&[b"hello", b"world"]), sha256(b"helloworld"));
        assert_eq!(sha256_concat(&[]), sha256(b""));
    }

    #[test]
    fn test_digest_hex_shape() {
        assert!(is_digest_hex(&sha256_hex(b"x")));
        assert!(!is_digest_hex("GENESIS"));
        assert!(!is_digest_hex(&sha256_hex(b"x").to_uppercase()));
    }
}
