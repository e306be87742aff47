use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user_accounts (
    id TEXT PRIMARY KEY,
    is_premium INTEGER NOT NULL DEFAULT 0,
    premium_expires_at INTEGER,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS promo_codes (
    id TEXT PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    discount_type TEXT NOT NULL,
    discount_value INTEGER NOT NULL CHECK (discount_value >= 0),
    max_uses INTEGER CHECK (max_uses IS NULL OR max_uses >= 1),
    current_uses INTEGER NOT NULL DEFAULT 0,
    valid_from INTEGER NOT NULL,
    valid_until INTEGER NOT NULL,
    applicable_plans TEXT,
    new_users_only INTEGER NOT NULL DEFAULT 0,
    description TEXT,
    created_at INTEGER NOT NULL,
    CHECK (valid_from < valid_until),
    CHECK (max_uses IS NULL OR current_uses <= max_uses)
);

CREATE TABLE IF NOT EXISTS promo_code_uses (
    id TEXT PRIMARY KEY,
    promo_code_id TEXT NOT NULL REFERENCES promo_codes(id),
    user_id TEXT NOT NULL,
    subscription_id TEXT,
    used_at INTEGER NOT NULL,
    UNIQUE (promo_code_id, user_id)
);

CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL,
    plan_type TEXT NOT NULL,
    billing_key_encrypted BLOB,
    payment_method TEXT NOT NULL,
    card_last_four TEXT,
    card_issuer TEXT,
    started_at INTEGER NOT NULL,
    current_period_start INTEGER NOT NULL,
    current_period_end INTEGER NOT NULL,
    price_per_month INTEGER NOT NULL,
    total_paid INTEGER NOT NULL,
    order_id TEXT,
    cancelled_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id, started_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_one_active
    ON subscriptions(user_id) WHERE status = 'active';

CREATE TABLE IF NOT EXISTS payment_transactions (
    id TEXT PRIMARY KEY,
    subscription_id TEXT,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL,
    transaction_type TEXT NOT NULL,
    gateway_provider TEXT NOT NULL,
    gateway_transaction_id TEXT,
    amount INTEGER NOT NULL,
    net_amount INTEGER NOT NULL,
    paid_at INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    order_id TEXT UNIQUE,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_payment_transactions_paid_at
    ON payment_transactions(status, paid_at);

CREATE TABLE IF NOT EXISTS checkout_orders (
    order_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    plan_type TEXT NOT NULL,
    base_amount INTEGER NOT NULL,
    final_amount INTEGER NOT NULL,
    promo_code_id TEXT,
    free_trial_days INTEGER,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS order_activations (
    order_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    plan_type TEXT NOT NULL,
    amount INTEGER NOT NULL,
    promo_code_id TEXT,
    subscription_id TEXT NOT NULL REFERENCES subscriptions(id),
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS saga_followups (
    id TEXT PRIMARY KEY,
    order_id TEXT,
    user_id TEXT NOT NULL,
    step TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    resolved_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_saga_followups_open ON saga_followups(resolved_at, created_at);
";

/// Create all tables and indexes. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
