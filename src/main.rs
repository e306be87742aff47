use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use jwt_simple::prelude::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use premium_billing::{
    app,
    auth::IdentityVerifier,
    billing::{CheckoutUrls, reconcile_premium_flags},
    config::Config,
    crypto::MasterKey,
    db::{self, AppState},
    payments::TossPaymentsClient,
};

/// Only used when APP_ENV=dev and no IDENTITY_JWT_SECRET is set.
const DEV_IDENTITY_SECRET: &str = "dev-identity-secret-do-not-use-in-production";

#[derive(Parser)]
#[command(name = "premium-billing", version, about = "Subscription activation and promo pricing service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create the database schema and exit
    InitDb,
    /// Recompute every user's premium flag from their subscriptions
    ReconcilePremium,
    /// Mint an identity token for local testing (dev mode only)
    DevToken {
        user_id: String,
        #[arg(long)]
        admin: bool,
        /// Token lifetime in hours
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
}

fn identity_verifier(config: &Config) -> anyhow::Result<IdentityVerifier> {
    match &config.identity_jwt_secret {
        Some(secret) => Ok(IdentityVerifier::new(secret.as_bytes())),
        None if config.dev_mode => {
            tracing::warn!("IDENTITY_JWT_SECRET not set, using the dev secret");
            Ok(IdentityVerifier::new(DEV_IDENTITY_SECRET.as_bytes()))
        }
        None => bail!("IDENTITY_JWT_SECRET must be set"),
    }
}

fn master_key(config: &Config) -> anyhow::Result<MasterKey> {
    match &config.master_key {
        Some(encoded) => MasterKey::from_base64(encoded).context("Invalid MASTER_KEY"),
        None if config.dev_mode => {
            tracing::warn!("MASTER_KEY not set, generated an ephemeral key; stored billing keys will not survive a restart");
            Ok(MasterKey::generate())
        }
        None => bail!("MASTER_KEY must be set (base64, 32 bytes)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "premium_billing=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::InitDb => {
            db::create_pool(&config.database_path, 1)?;
            tracing::info!(path = %config.database_path, "Database initialized");
            Ok(())
        }
        Command::ReconcilePremium => {
            let pool = db::create_pool(&config.database_path, 1)?;
            let conn = pool.get()?;
            let report = reconcile_premium_flags(&conn, chrono::Utc::now().timestamp())?;
            tracing::info!(
                users_checked = report.users_checked,
                flags_changed = report.flags_changed,
                followups_resolved = report.followups_resolved,
                "Premium flags reconciled"
            );
            Ok(())
        }
        Command::DevToken {
            user_id,
            admin,
            hours,
        } => {
            if !config.dev_mode {
                bail!("dev-token is only available with APP_ENV=dev");
            }
            let token = identity_verifier(&config)?.sign(&user_id, admin, Duration::from_hours(hours))?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config.database_path, 10)
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;

    if config.toss_secret_key.is_empty() && !config.dev_mode {
        bail!("TOSS_SECRET_KEY must be set");
    }
    let gateway = TossPaymentsClient::new(&config.toss_secret_key, &config.toss_api_base)?;

    let state = AppState {
        db: pool,
        gateway: Arc::new(gateway),
        master_key: master_key(&config)?,
        identity: identity_verifier(&config)?,
        prices: config.prices,
        checkout_urls: CheckoutUrls {
            success_url: config.checkout_success_url.clone(),
            fail_url: config.checkout_fail_url.clone(),
        },
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = app(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    tracing::info!(addr = %config.addr(), base_url = %config.base_url, dev_mode = config.dev_mode, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install shutdown handler: {}", e);
    }
    tracing::info!("Shutting down");
}
