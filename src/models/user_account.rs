use serde::{Deserialize, Serialize};

/// Local projection of the identity provider's user.
///
/// `is_premium` mirrors whether an active, unexpired subscription exists.
/// It is a cache; the `subscriptions` table is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub is_premium: bool,
    pub premium_expires_at: Option<i64>,
    pub updated_at: i64,
}
