//! HTTP API application wiring (Axum router + service wiring).
//!
//! If you're new to Rust, this folder is structured like:
//! - `services.rs`: infrastructure wiring (event store/bus, projection, gateway)
//! - `routes/`: HTTP routes + handlers (one file per surface area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Builds the router around an already-wired service set.
///
/// Split out from [`build_app`] so tests can seed orders or swap stores
/// before the server starts taking requests.
pub fn build_app_with(services: Arc<AppServices>) -> Router {
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::actor_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}

/// Builds the production application: wires services from the environment,
/// then mounts the routes.
pub async fn build_app() -> Router {
    let services = Arc::new(services::build_services().await);
    build_app_with(services)
}
