//! # phonebook-server
//!
//! A small REST service over a PostgreSQL `phonebook` table. On startup it brings
//! its schema up to date with `phonebook-migrate` before accepting requests.

pub mod config;
pub mod error;
pub mod logging;
pub mod records;
pub mod startup;

use axum::routing::get;
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

pub use config::{ConfigError, LogFormat, ServiceConfig};
pub use error::{ApiError, ApiResult};
pub use records::{Record, RecordInput};
pub use startup::{commit_retry_policy, migrate_database};

/// Build the HTTP router
pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/api/v1/records", get(records::list).post(records::insert))
        .route(
            "/api/v1/records/:id",
            get(records::select)
                .put(records::update)
                .delete(records::delete),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(pool)
}
