use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::post,
    Json, Router,
};

use portico_auth::NewDevice;
use portico_core::DeviceId;

use crate::app::{dto, errors, services::AppServices};
use crate::authz;
use crate::context::SessionContext;

pub fn public_router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
}

pub fn protected_router() -> Router {
    Router::new().route("/:id/deactivate", post(deactivate))
}

/// POST /devices/register
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewDevice>,
) -> axum::response::Response {
    match services.devices.register(body).await {
        Ok(device) => errors::ok(device),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /devices/heartbeat
///
/// The timestamp is written in the background; only the device lookup is awaited.
pub async fn heartbeat(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::HeartbeatRequest>,
) -> axum::response::Response {
    if let Err(e) = services.devices.verify(&body.device_uid).await {
        return errors::auth_error_to_response(e);
    }
    let _ = services.devices.heartbeat(&body.device_uid);
    errors::ok(serde_json::json!({ "message": "heartbeat received" }))
}

/// POST /devices/:id/deactivate
pub async fn deactivate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&services, &ctx, "admin.device.delete").await {
        return resp;
    }

    match services.sessions.deactivate_device(DeviceId::new(id)).await {
        Ok(count) => errors::ok(dto::CountResponse { count }),
        Err(e) => errors::auth_error_to_response(e),
    }
}
