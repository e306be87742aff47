//! Identity tokens issued by the external identity provider.
//!
//! Tokens are HS256 JWTs. `sub` carries the user id; a custom `role` claim
//! equal to `"admin"` marks administrators.

use std::sync::Arc;

use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The caller, as vouched for by the identity provider.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub is_admin: bool,
}

#[derive(Clone)]
pub struct IdentityVerifier {
    key: Arc<HS256Key>,
}

impl IdentityVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Arc::new(HS256Key::from_bytes(secret)),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity> {
        let claims = self
            .key
            .verify_token::<IdentityClaims>(token, None)
            .map_err(|e| {
                tracing::debug!("Identity token rejected: {}", e);
                AppError::Unauthorized
            })?;

        let user_id = claims
            .subject
            .filter(|s| !s.is_empty())
            .ok_or(AppError::Unauthorized)?;

        Ok(Identity {
            user_id,
            is_admin: claims.custom.role.as_deref() == Some(ADMIN_ROLE),
        })
    }

    /// Mint a token the way the identity provider would. Used by `dev-token`
    /// and tests; production tokens come from the provider.
    pub fn sign(&self, user_id: &str, admin: bool, valid_for: Duration) -> Result<String> {
        let custom = IdentityClaims {
            role: admin.then(|| ADMIN_ROLE.to_string()),
        };
        let claims = Claims::with_custom_claims(custom, valid_for).with_subject(user_id);
        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign identity token: {}", e)))
    }
}
