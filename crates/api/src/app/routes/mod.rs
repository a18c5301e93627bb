use axum::{
    routing::{get, post},
    Router,
};

pub mod admin;
pub mod refunds;
pub mod system;

/// Router for all authenticated (actor-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/refunds", post(refunds::submit_refund))
        .nest("/admin", admin::router())
}
