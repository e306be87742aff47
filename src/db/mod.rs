pub mod from_row;
pub mod queries;
mod schema;

use std::path::Path;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::auth::IdentityVerifier;
use crate::billing::{
    AdminOverrideActivator, CheckoutSessionBuilder, CheckoutUrls, SubscriptionActivator,
};
use crate::crypto::MasterKey;
use crate::models::PlanPrices;
use crate::payments::PaymentGateway;

pub use schema::init_db;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub gateway: Arc<dyn PaymentGateway>,
    pub master_key: MasterKey,
    pub identity: IdentityVerifier,
    pub prices: PlanPrices,
    pub checkout_urls: CheckoutUrls,
}

impl AppState {
    pub fn checkout_builder(&self) -> CheckoutSessionBuilder {
        CheckoutSessionBuilder::new(self.gateway.clone(), self.prices, self.checkout_urls.clone())
    }

    pub fn activator(&self) -> SubscriptionActivator {
        SubscriptionActivator::new(self.db.clone(), self.gateway.clone(), self.master_key.clone())
    }

    pub fn admin(&self) -> AdminOverrideActivator {
        AdminOverrideActivator::new(self.db.clone())
    }
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Open a pooled, file-backed database. The schema is created if missing.
pub fn create_pool(path: impl AsRef<Path>, max_size: u32) -> crate::error::Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
    let pool = Pool::builder().max_size(max_size).build(manager)?;
    {
        let conn = pool.get()?;
        init_db(&conn)?;
    }
    Ok(pool)
}
