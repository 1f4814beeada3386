//! Authentication and account protection.
//!
//! - [`jwt`] -- access-token signing and validation.
//! - [`password`] -- Argon2id hashing.
//! - [`credentials`] -- the user-directory seam.
//! - [`refresh_tokens`] / [`reuse`] -- refresh-token rotation and replay detection.
//! - [`ip_blocker`] -- failed-login tracking and IP blocks.
//! - [`sessions`] / [`geo`] -- per-device session tracking.
//! - [`token_cache`] -- token pairs shared between request contexts.
//! - [`orchestrator`] -- login, refresh and logout flows over all of the above.

pub mod credentials;
pub mod geo;
pub mod ip_blocker;
pub mod jwt;
pub mod orchestrator;
pub mod password;
pub mod refresh_tokens;
pub mod reuse;
pub mod sessions;
pub mod token_cache;
