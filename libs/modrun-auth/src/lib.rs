//! Principal model and bearer-token verification.
//!
//! The platform core never issues or stores credentials; it consumes an
//! already-authenticated principal. This crate owns the boundary piece both
//! transports share: verifying an HS256 bearer token and turning its claims
//! into a [`Principal`] with scopes and roles.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use modrun_errors::ApiError;

/// Scopes the core references when gating operations.
pub mod scope {
    pub const MODULES_READ: &str = "modules:read";
    pub const MODULES_WRITE: &str = "modules:write";
    pub const EXECUTE_ALL: &str = "execute:all";
    pub const EXECUTE_LIMITED: &str = "execute:limited";
}

/// Role gating the log-reading endpoints.
pub const ROLE_ADMIN: &str = "admin";

/// Authenticated caller attached to the request context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Require one specific scope.
    pub fn require_scope(&self, scope: &str) -> Result<(), AuthError> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(AuthError::InsufficientScope {
                required: scope.to_owned(),
            })
        }
    }

    /// Require at least one of the given scopes.
    pub fn require_any_scope(&self, scopes: &[&str]) -> Result<(), AuthError> {
        if scopes.iter().any(|s| self.has_scope(s)) {
            Ok(())
        } else {
            Err(AuthError::InsufficientScope {
                required: scopes.join(" or "),
            })
        }
    }

    pub fn require_role(&self, role: &str) -> Result<(), AuthError> {
        if self.has_role(role) {
            Ok(())
        } else {
            Err(AuthError::InsufficientRole {
                required: role.to_owned(),
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid bearer token: {0}")]
    InvalidToken(String),

    #[error("not enough permissions, required scope: {required}")]
    InsufficientScope { required: String },

    #[error("not enough permissions, required role: {required}")]
    InsufficientRole { required: String },
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match &err {
            AuthError::MissingToken | AuthError::InvalidToken(_) => {
                ApiError::unauthorized(err.to_string())
            }
            AuthError::InsufficientScope { .. } | AuthError::InsufficientRole { .. } => {
                ApiError::forbidden(err.to_string())
            }
        }
    }
}

/// Claims carried by the externally-issued token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Username.
    pub sub: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

/// Verifies bearer tokens against a shared HS256 secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a raw token string and produce the caller's principal.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Principal {
            username: data.claims.sub,
            scopes: data.claims.scopes,
            roles: data.claims.roles,
        })
    }

    /// Extract and verify the token from an `Authorization` header value.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let header = header.ok_or(AuthError::MissingToken)?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret";

    fn issue(scopes: &[&str], roles: &[&str]) -> String {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600;
        let claims = Claims {
            sub: "alice".to_owned(),
            scopes: scopes.iter().map(|s| (*s).to_owned()).collect(),
            roles: roles.iter().map(|r| (*r).to_owned()).collect(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn verifies_valid_token() {
        let verifier = TokenVerifier::new(SECRET);
        let token = issue(&[scope::MODULES_READ], &[]);
        let principal = verifier.verify(&token).unwrap();
        assert_eq!(principal.username, "alice");
        assert!(principal.has_scope(scope::MODULES_READ));
        assert!(!principal.has_role(ROLE_ADMIN));
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = TokenVerifier::new("other-secret");
        let token = issue(&[], &[]);
        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn header_extraction_requires_bearer_prefix() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(matches!(
            verifier.verify_header(None),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            verifier.verify_header(Some("Basic abc")),
            Err(AuthError::MissingToken)
        ));
        let token = issue(&[scope::EXECUTE_ALL], &[]);
        let principal = verifier
            .verify_header(Some(&format!("Bearer {token}")))
            .unwrap();
        assert!(principal.has_scope(scope::EXECUTE_ALL));
    }

    #[test]
    fn scope_and_role_requirements() {
        let principal = Principal {
            username: "bob".to_owned(),
            scopes: vec![scope::EXECUTE_LIMITED.to_owned()],
            roles: vec![ROLE_ADMIN.to_owned()],
        };
        assert!(principal.require_scope(scope::EXECUTE_LIMITED).is_ok());
        assert!(principal.require_scope(scope::MODULES_WRITE).is_err());
        assert!(
            principal
                .require_any_scope(&[scope::EXECUTE_ALL, scope::EXECUTE_LIMITED])
                .is_ok()
        );
        assert!(principal.require_role(ROLE_ADMIN).is_ok());
        assert!(principal.require_role("auditor").is_err());
    }
}
