//! Access-token issuance and validation.
//!
//! Access tokens are HS256-signed JWTs carrying a [`Claims`] payload: the
//! registered claims (`sub`, `exp`, `iat`, `jti`, `iss`, `aud`) plus the
//! user's [`ClaimSet`]. Refresh tokens are opaque values handled by
//! [`super::refresh_tokens`].

use chrono::{Duration, Utc};
use gatekeeper_core::claims::ClaimSet;
use gatekeeper_core::error::CoreError;
use gatekeeper_core::types::{DbId, Timestamp};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{parse_var, ConfigError};

/// Minimum HMAC key length in bytes.
pub const MIN_SECRET_BYTES: usize = 32;

/// Default access token expiry in minutes.
const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 15;
/// Default refresh token expiry in days.
const DEFAULT_REFRESH_EXPIRY_DAYS: i64 = 7;

/// JWT claims embedded in every access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject -- the user's internal database id.
    pub sub: DbId,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier (UUID v4); correlates the token with its
    /// session and refresh token.
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub security_stamp: String,
}

/// Configuration for JWT token generation and validation.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret used to sign and verify tokens.
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    /// Access token lifetime in minutes (default: 15).
    pub access_token_expiry_mins: i64,
    /// Refresh token lifetime in days (default: 7).
    pub refresh_token_expiry_days: i64,
}

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                    | Required | Default              |
    /// |----------------------------|----------|----------------------|
    /// | `JWT_SECRET`               | **yes**  | --                   |
    /// | `JWT_ISSUER`               | no       | `gatekeeper`         |
    /// | `JWT_AUDIENCE`             | no       | `gatekeeper-console` |
    /// | `JWT_ACCESS_EXPIRY_MINS`   | no       | `15`                 |
    /// | `JWT_REFRESH_EXPIRY_DAYS`  | no       | `7`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret =
            std::env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;

        Ok(Self {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "gatekeeper".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "gatekeeper-console".into()),
            access_token_expiry_mins: parse_var(
                "JWT_ACCESS_EXPIRY_MINS",
                DEFAULT_ACCESS_EXPIRY_MINS,
            )?,
            refresh_token_expiry_days: parse_var(
                "JWT_REFRESH_EXPIRY_DAYS",
                DEFAULT_REFRESH_EXPIRY_DAYS,
            )?,
        })
    }
}

/// A signed access token and the metadata callers correlate it with.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jwt_id: String,
    pub expires_at: Timestamp,
}

/// Signs and validates access tokens.
///
/// Construction checks the key material, so a running issuer never fails
/// for configuration reasons.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_token_expiry_mins: i64,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_token_expiry_mins", &self.access_token_expiry_mins)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(config: &JwtConfig) -> Result<Self, ConfigError> {
        if config.secret.is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }
        if config.secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::WeakSecret {
                min: MIN_SECRET_BYTES,
            });
        }
        if config.issuer.trim().is_empty() {
            return Err(ConfigError::Empty("JWT_ISSUER"));
        }
        if config.audience.trim().is_empty() {
            return Err(ConfigError::Empty("JWT_AUDIENCE"));
        }
        if config.access_token_expiry_mins <= 0 {
            return Err(ConfigError::Invalid {
                var: "JWT_ACCESS_EXPIRY_MINS",
                value: config.access_token_expiry_mins.to_string(),
            });
        }
        if config.refresh_token_expiry_days <= 0 {
            return Err(ConfigError::Invalid {
                var: "JWT_REFRESH_EXPIRY_DAYS",
                value: config.refresh_token_expiry_days.to_string(),
            });
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_expiry_mins: config.access_token_expiry_mins,
        })
    }

    /// Sign `claims` into a token valid for `validity_minutes`.
    ///
    /// Every call mints a fresh `jti`.
    pub fn issue(&self, claims: &ClaimSet, validity_minutes: i64) -> Result<IssuedToken, CoreError> {
        let now = Utc::now();
        let expires_at = now + Duration::minutes(validity_minutes);
        let jwt_id = Uuid::new_v4().to_string();

        let payload = Claims {
            sub: claims.subject,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: jwt_id.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            name: claims.name.clone(),
            email: claims.email.clone(),
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
            security_stamp: claims.security_stamp.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &payload, &self.encoding)
            .map_err(|e| CoreError::Internal(format!("Failed to sign access token: {e}")))?;

        Ok(IssuedToken {
            token,
            jwt_id,
            expires_at,
        })
    }

    /// Issue a token with the configured access-token lifetime.
    pub fn issue_access(&self, claims: &ClaimSet) -> Result<IssuedToken, CoreError> {
        self.issue(claims, self.access_token_expiry_mins)
    }

    /// Validate signature, expiry, issuer and audience, returning the claims.
    pub fn validate(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    /// Helper to build a test config with a known secret.
    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            issuer: "gatekeeper".to_string(),
            audience: "gatekeeper-console".to_string(),
            access_token_expiry_mins: 15,
            refresh_token_expiry_days: 7,
        }
    }

    fn claim_set() -> ClaimSet {
        ClaimSet {
            subject: 42,
            name: "ada".to_string(),
            email: "ada@example.com".to_string(),
            roles: vec!["admin".to_string()],
            permissions: vec!["security.manage".to_string()],
            security_stamp: "stamp-1".to_string(),
        }
    }

    #[test]
    fn issued_token_validates_and_carries_claims() {
        let issuer = TokenIssuer::new(&test_config()).unwrap();
        let issued = issuer.issue_access(&claim_set()).unwrap();

        let claims = issuer.validate(&issued.token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.jti, issued.jwt_id);
        assert_eq!(claims.iss, "gatekeeper");
        assert_eq!(claims.aud, "gatekeeper-console");
        assert_eq!(claims.roles, vec!["admin"]);
        assert_eq!(claims.security_stamp, "stamp-1");
        assert_eq!(claims.exp, issued.expires_at.timestamp());
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn every_issue_gets_a_fresh_jti() {
        let issuer = TokenIssuer::new(&test_config()).unwrap();
        let a = issuer.issue_access(&claim_set()).unwrap();
        let b = issuer.issue_access(&claim_set()).unwrap();
        assert_ne!(a.jwt_id, b.jwt_id);
    }

    #[test]
    fn expired_token_fails() {
        let issuer = TokenIssuer::new(&test_config()).unwrap();
        // Well beyond the default 60-second leeway.
        let issued = issuer.issue(&claim_set(), -5).unwrap();
        assert!(issuer.validate(&issued.token).is_err());
    }

    #[test]
    fn wrong_audience_or_issuer_fails() {
        let issuer = TokenIssuer::new(&test_config()).unwrap();
        let token = issuer.issue_access(&claim_set()).unwrap().token;

        let other_audience = TokenIssuer::new(&JwtConfig {
            audience: "another-app".to_string(),
            ..test_config()
        })
        .unwrap();
        assert!(other_audience.validate(&token).is_err());

        let other_issuer = TokenIssuer::new(&JwtConfig {
            issuer: "someone-else".to_string(),
            ..test_config()
        })
        .unwrap();
        assert!(other_issuer.validate(&token).is_err());
    }

    #[test]
    fn different_secrets_fail() {
        let a = TokenIssuer::new(&test_config()).unwrap();
        let b = TokenIssuer::new(&JwtConfig {
            secret: "another-secret-that-is-also-long-enough".to_string(),
            ..test_config()
        })
        .unwrap();

        let token = a.issue_access(&claim_set()).unwrap().token;
        assert!(b.validate(&token).is_err());
    }

    #[test]
    fn short_secret_is_rejected_at_construction() {
        let result = TokenIssuer::new(&JwtConfig {
            secret: "too-short".to_string(),
            ..test_config()
        });
        assert_matches!(result, Err(ConfigError::WeakSecret { min: 32 }));
    }

    #[test]
    fn blank_issuer_is_rejected_at_construction() {
        let result = TokenIssuer::new(&JwtConfig {
            issuer: "  ".to_string(),
            ..test_config()
        });
        assert_matches!(result, Err(ConfigError::Empty("JWT_ISSUER")));
    }

    #[test]
    fn non_positive_refresh_lifetime_is_rejected_at_construction() {
        for days in [0, -3] {
            let result = TokenIssuer::new(&JwtConfig {
                refresh_token_expiry_days: days,
                ..test_config()
            });
            assert_matches!(
                result,
                Err(ConfigError::Invalid { var: "JWT_REFRESH_EXPIRY_DAYS", .. })
            );
        }
    }
}
