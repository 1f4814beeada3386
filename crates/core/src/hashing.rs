//! SHA-256 and HMAC-SHA256 hex digest utilities.
//!
//! `sha256_hex` is the at-rest form of refresh tokens; `keyed_hash_hex` is the
//! form stored in the reuse ledger, so a ledger dump cannot be matched against
//! a token table dump without the ledger key.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Compute an HMAC-SHA256 of `data` under `key`, hex encoded.
///
/// HMAC accepts keys of any length, including empty ones.
pub fn keyed_hash_hex(key: &[u8], data: &[u8]) -> String {
    // Only fixed-size-key MACs reject a key here.
    match HmacSha256::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(data);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => sha256_hex(data),
    }
}

mod hex {
    /// Encode bytes as a lowercase hex string.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        let hash = sha256_hex(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn consistent_output() {
        let data = b"hello world";
        assert_eq!(sha256_hex(data), sha256_hex(data));
        assert_eq!(sha256_hex(data).len(), 64);
    }

    #[test]
    fn keyed_hash_matches_rfc4231_case_2() {
        let mac = keyed_hash_hex(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            mac,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn keyed_hash_depends_on_key() {
        let a = keyed_hash_hex(b"key-a", b"token");
        let b = keyed_hash_hex(b"key-b", b"token");
        assert_ne!(a, b);
        assert_ne!(a, sha256_hex(b"token"));
    }
}
