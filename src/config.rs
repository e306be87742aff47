use std::env;

use crate::models::PlanPrices;

const DEFAULT_TOSS_API_BASE: &str = "https://api.tosspayments.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    /// Secret API key for the payment gateway (Basic auth username)
    pub toss_secret_key: String,
    pub toss_api_base: String,
    /// Shared HS256 secret of the identity provider
    pub identity_jwt_secret: Option<String>,
    /// Base64-encoded 32-byte key for billing-key encryption
    pub master_key: Option<String>,
    pub prices: PlanPrices,
    pub checkout_success_url: String,
    pub checkout_fail_url: String,
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("APP_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let defaults = PlanPrices::default();
        let prices = PlanPrices {
            monthly: env_i64("PLAN_PRICE_MONTHLY", defaults.monthly),
            yearly: env_i64("PLAN_PRICE_YEARLY", defaults.yearly),
        };

        let checkout_success_url = env::var("CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|_| format!("{}/checkout/success", base_url));
        let checkout_fail_url = env::var("CHECKOUT_FAIL_URL")
            .unwrap_or_else(|_| format!("{}/checkout/fail", base_url));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "premium_billing.db".to_string()),
            base_url,
            dev_mode,
            toss_secret_key: env::var("TOSS_SECRET_KEY").unwrap_or_default(),
            toss_api_base: env::var("TOSS_API_BASE")
                .unwrap_or_else(|_| DEFAULT_TOSS_API_BASE.to_string()),
            identity_jwt_secret: env::var("IDENTITY_JWT_SECRET").ok().filter(|s| !s.is_empty()),
            master_key: env::var("MASTER_KEY").ok().filter(|s| !s.is_empty()),
            prices,
            checkout_success_url,
            checkout_fail_url,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
