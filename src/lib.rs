pub mod auth;
pub mod billing;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod util;

use axum::Router;

use crate::db::AppState;

/// The full HTTP surface, without transport layers (tracing, CORS).
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::public::router(state.clone()))
        .merge(handlers::admin::router(state.clone()))
        .with_state(state)
}
