//! Claim-set assembly for access tokens.
//!
//! [`build_claims`] is a pure function of the user identity and its granted
//! roles and permissions. The token issuer in the API crate adds the
//! registered claims (`iss`, `aud`, `exp`, `iat`, `jti`) on top of this set.

use serde::{Deserialize, Serialize};

use crate::types::DbId;

/// The identity a credential verifier hands back after a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: DbId,
    pub username: String,
    pub email: String,
    /// Rotated by the user directory whenever credentials change. Tokens
    /// carrying an older stamp can be rejected by downstream services.
    pub security_stamp: String,
}

/// Identity plus authorization data, as embedded in an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Subject: the user's internal database id.
    pub subject: DbId,
    pub name: String,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub security_stamp: String,
}

impl ClaimSet {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Build the claim set for `user`.
///
/// Role and permission names are trimmed, blank entries dropped, and the
/// result sorted and de-duplicated, so the same grants always produce the
/// same claims regardless of the order the directory returned them in.
pub fn build_claims(user: &UserIdentity, roles: &[String], permissions: &[String]) -> ClaimSet {
    ClaimSet {
        subject: user.id,
        name: user.username.clone(),
        email: user.email.clone(),
        roles: normalize(roles),
        permissions: normalize(permissions),
        security_stamp: user.security_stamp.clone(),
    }
}

fn normalize(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    out.sort();
    out.dedup();
    out
}
