use axum::Router;

pub mod admin;
pub mod auth;
pub mod devices;
pub mod sessions;
pub mod system;

/// Endpoints reachable without a credential.
pub fn public_router() -> Router {
    Router::new()
        .nest("/auth", auth::public_router())
        .nest("/devices", devices::public_router())
}

/// Endpoints behind bearer + device verification.
pub fn protected_router() -> Router {
    Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/devices", devices::protected_router())
        .nest("/sessions", sessions::router())
        .merge(admin::router())
}
