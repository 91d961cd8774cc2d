//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and the shared session/device/admin services
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: the response envelope and error mapping

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub const API_PREFIX: &str = "/api/v1";

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    // Protected routes: bearer first, then the device headers.
    let protected = routes::protected_router()
        .layer(axum::middleware::from_fn_with_state(
            services.clone(),
            middleware::device_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            services.clone(),
            middleware::auth_middleware,
        ));

    let api = routes::public_router().merge(protected);

    Router::new()
        .route("/health", get(routes::system::health))
        .nest(API_PREFIX, api)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
