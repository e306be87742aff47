//! Reconciliation of the premium flag projection.
//!
//! `user_accounts.is_premium` is a cache of "has an active, unexpired
//! subscription". Activation and admin actions refresh it as they go; this
//! pass repairs whatever they missed and catches periods that lapsed.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub users_checked: usize,
    pub flags_changed: usize,
    pub followups_resolved: usize,
}

pub fn reconcile_premium_flags(conn: &Connection, now: i64) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for user_id in queries::list_known_user_ids(conn)? {
        let before = queries::get_user_account(conn, &user_id)?;
        let after = queries::sync_premium_flag(conn, &user_id, now)?;

        let changed = before.is_none_or(|b| {
            b.is_premium != after.is_premium || b.premium_expires_at != after.premium_expires_at
        });
        if changed {
            tracing::info!(
                user_id = %user_id,
                is_premium = after.is_premium,
                premium_expires_at = ?after.premium_expires_at,
                "Premium flag reconciled"
            );
            report.flags_changed += 1;
        }

        report.followups_resolved += queries::resolve_premium_followups(conn, &user_id, now)?;
        report.users_checked += 1;
    }

    Ok(report)
}
