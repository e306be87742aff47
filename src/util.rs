//! Small helpers shared by handlers and billing services.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::error::ValidationError;

const PROMO_CODE_MIN_LEN: usize = 3;
const PROMO_CODE_MAX_LEN: usize = 32;

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token without the "Bearer " prefix, or None if the header is
/// missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Canonical form of a user-entered promo code: trimmed, NFKC, uppercase.
///
/// Full-width input (`ｓｐｒｉｎｇ２０`) folds to `SPRING20`. The result must be
/// 3-32 characters of `[A-Z0-9_-]`.
pub fn normalize_promo_code(raw: &str) -> Result<String, ValidationError> {
    let code: String = raw.trim().nfkc().collect::<String>().to_uppercase();

    let len_ok = (PROMO_CODE_MIN_LEN..=PROMO_CODE_MAX_LEN).contains(&code.len());
    let chars_ok = code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if len_ok && chars_ok {
        Ok(code)
    } else {
        Err(ValidationError::MalformedPromoCode)
    }
}

/// Generate a globally unique, user-scoped order id.
///
/// Format: `ord_<8 hex of sha256(user_id)>_<uuid v4 simple>` (45 chars),
/// which fits the gateway's `[A-Za-z0-9_-]{6,64}` order id rule.
pub fn generate_order_id(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    let scope = hex::encode(&digest[..4]);
    format!("ord_{}_{}", scope, Uuid::new_v4().simple())
}
