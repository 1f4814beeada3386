//! Row structs and insert DTOs.
//!
//! Each submodule contains a `FromRow` entity matching the table and a
//! `Create*` DTO for inserts. Entities exposed over HTTP also derive
//! `Serialize`.

pub mod blocked_ip;
pub mod failed_login_attempt;
pub mod refresh_token;
pub mod security_setting;
pub mod session;
pub mod user;
