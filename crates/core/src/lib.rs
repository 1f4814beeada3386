//! Domain logic for the Gatekeeper auth backend.
//!
//! This crate performs no I/O. Everything here is shared by the storage layer
//! and the HTTP layer.

pub mod block_policy;
pub mod claims;
pub mod error;
pub mod hashing;
pub mod network;
pub mod roles;
pub mod settings;
pub mod tokens;
pub mod types;
pub mod user_agent;
