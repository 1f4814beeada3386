//! Credential verification against the user directory.
//!
//! The directory itself (user, role and permission CRUD) belongs to another
//! service. This module only reads it: [`CredentialVerifier`] is the seam,
//! [`PgCredentialVerifier`] the default implementation over the `users`,
//! `user_roles` and `role_permissions` tables.

use async_trait::async_trait;
use gatekeeper_core::claims::UserIdentity;
use gatekeeper_core::types::DbId;
use gatekeeper_db::models::user::User;
use gatekeeper_db::repositories::UserRepo;
use sqlx::PgPool;

use crate::auth::password::{hash_password, verify_password};
use crate::error::{AppError, AppResult};

/// A verified user with everything needed to build a claim set.
#[derive(Debug, Clone)]
pub struct Principal {
    pub identity: UserIdentity,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// Why a credential check failed. Recorded on the failed-attempt row,
/// never returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFailure {
    UnknownUser,
    BadPassword,
    Disabled,
}

impl CredentialFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownUser => "unknown_user",
            Self::BadPassword => "invalid_password",
            Self::Disabled => "account_disabled",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Verification {
    Verified(Principal),
    Rejected(CredentialFailure),
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> AppResult<Verification>;

    /// Reload a principal by id, e.g. to rebuild claims on refresh.
    ///
    /// Returns `None` for unknown or disabled users.
    async fn load_principal(&self, user_id: DbId) -> AppResult<Option<Principal>>;
}

/// Verifier over the PostgreSQL user directory.
pub struct PgCredentialVerifier {
    pool: PgPool,
    /// Verified against when the username is unknown, so both failure paths
    /// cost one Argon2 verification.
    dummy_hash: Option<String>,
}

impl PgCredentialVerifier {
    pub fn new(pool: PgPool) -> Self {
        let dummy_hash = hash_password("gatekeeper-timing-equalizer").ok();
        Self { pool, dummy_hash }
    }

    async fn principal_for(&self, user: User) -> AppResult<Principal> {
        let roles = UserRepo::list_roles(&self.pool, user.id).await?;
        let permissions = UserRepo::list_permissions(&self.pool, user.id).await?;
        Ok(Principal {
            identity: UserIdentity {
                id: user.id,
                username: user.username,
                email: user.email,
                security_stamp: user.security_stamp,
            },
            roles,
            permissions,
        })
    }
}

#[async_trait]
impl CredentialVerifier for PgCredentialVerifier {
    async fn verify(&self, username: &str, password: &str) -> AppResult<Verification> {
        let Some(user) = UserRepo::find_by_username(&self.pool, username).await? else {
            if let Some(dummy) = &self.dummy_hash {
                let _ = verify_password(password, dummy);
            }
            return Ok(Verification::Rejected(CredentialFailure::UnknownUser));
        };

        let matches = verify_password(password, &user.password_hash)
            .map_err(|e| AppError::InternalError(format!("Password verification error: {e}")))?;
        if !matches {
            return Ok(Verification::Rejected(CredentialFailure::BadPassword));
        }
        if !user.is_active {
            return Ok(Verification::Rejected(CredentialFailure::Disabled));
        }

        Ok(Verification::Verified(self.principal_for(user).await?))
    }

    async fn load_principal(&self, user_id: DbId) -> AppResult<Option<Principal>> {
        match UserRepo::find_by_id(&self.pool, user_id).await? {
            Some(user) if user.is_active => Ok(Some(self.principal_for(user).await?)),
            _ => Ok(None),
        }
    }
}
