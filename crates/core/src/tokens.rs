//! Opaque token values and revocation reasons.
//!
//! Lives in `core` so the store implementations and the API layer agree on
//! the exact reason strings written to `refresh_tokens.revocation_reason`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::hashing::sha256_hex;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Random bytes in a refresh token (512 bits).
pub const REFRESH_TOKEN_BYTES: usize = 64;

/// Random bytes in a session token.
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Reasons recorded when a refresh token is revoked.
pub mod revocation {
    /// The token was consumed by a successful rotation.
    pub const ROTATED: &str = "rotated";
    /// A consumed token was presented again; the whole chain is burnt.
    pub const REUSE_DETECTED: &str = "security: reuse detected";
    /// The owner logged out.
    pub const LOGOUT: &str = "security: logout";
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// A freshly generated refresh token.
pub struct GeneratedToken {
    /// Handed to the client exactly once, never stored.
    pub plaintext: String,
    /// SHA-256 hex digest of `plaintext`, stored and used for lookup.
    pub hash: String,
}

/// Generate a new refresh token value.
pub fn generate_refresh_token() -> GeneratedToken {
    let plaintext = random_url_safe(REFRESH_TOKEN_BYTES);
    let hash = hash_refresh_token(&plaintext);
    GeneratedToken { plaintext, hash }
}

/// Compute the at-rest digest of a refresh token value.
pub fn hash_refresh_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

/// Generate an opaque session identifier for `user_sessions.session_token`.
pub fn generate_session_token() -> String {
    random_url_safe(SESSION_TOKEN_BYTES)
}

fn random_url_safe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
