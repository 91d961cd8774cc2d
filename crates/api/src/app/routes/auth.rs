use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};

use portico_auth::LoginRequest;
use portico_core::{LogoutReason, SystemScope};

use crate::app::{dto, errors, services::AppServices};
use crate::context::{DeviceContext, SessionContext};
use crate::middleware::{self, client_ip};

/// Unauthenticated entry points.
pub fn public_router() -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh))
}

/// Routes behind bearer and device verification.
pub fn protected_router() -> Router {
    let system_only = Router::new()
        .route("/menus", get(menus))
        .route_layer(axum::middleware::from_fn(middleware::require_system_context));

    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/switch-system", post(switch_system))
        .route("/exit-system", post(exit_system))
        .route("/systems", get(systems))
        .route("/permissions", get(permissions))
        .merge(system_only)
}

/// POST /auth/login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<dto::LoginRequest>,
) -> axum::response::Response {
    if body.email.trim().is_empty() || body.password.is_empty() || body.device_uid.trim().is_empty() {
        return errors::bad_request("email, password and device_uid are required");
    }

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let request = LoginRequest {
        email: body.email,
        password: body.password,
        device_uid: body.device_uid,
        ip_address: client_ip(&headers),
        user_agent,
    };

    match services.sessions.login(request).await {
        Ok(outcome) => errors::ok(outcome),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /auth/refresh
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RefreshRequest>,
) -> axum::response::Response {
    match services.sessions.refresh(&body.refresh_token).await {
        Ok(pair) => errors::ok(pair),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /auth/logout
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
) -> axum::response::Response {
    match services.sessions.logout(ctx.session_id(), LogoutReason::User).await {
        Ok(()) => errors::ok(serde_json::json!({ "message": "logged out" })),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /auth/me
pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Extension(device): Extension<DeviceContext>,
) -> axum::response::Response {
    let user = match services.sessions.active_user(ctx.user_id()).await {
        Ok(user) => user,
        Err(e) => return errors::auth_error_to_response(e),
    };
    let claims = &ctx.authenticated().claims;

    errors::ok(dto::MeResponse {
        user,
        session_id: claims.session_id,
        device_id: claims.device_id,
        device_uid: device.device().device_uid.clone(),
        platform: device.platform().to_string(),
        token_type: ctx.token_kind().as_str(),
        system_id: claims.system_id,
        system_code: claims.system_code.clone(),
        role_ids: claims.role_ids.clone(),
    })
}

/// POST /auth/switch-system
pub async fn switch_system(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    headers: HeaderMap,
    Json(body): Json<dto::SwitchSystemRequest>,
) -> axum::response::Response {
    let code = body.system_code.trim();
    if code.is_empty() {
        return errors::bad_request("system_code is required");
    }

    match services
        .sessions
        .switch_system(ctx.authenticated(), code, &client_ip(&headers))
        .await
    {
        Ok(outcome) => errors::ok(outcome),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /auth/exit-system
pub async fn exit_system(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
) -> axum::response::Response {
    match services.sessions.exit_system(ctx.authenticated()).await {
        Ok(grant) => errors::ok(grant),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /auth/systems
pub async fn systems(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
) -> axum::response::Response {
    match services.sessions.available_systems(ctx.user_id()).await {
        Ok(systems) => errors::ok(systems),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /auth/permissions - effective codes in the credential's scope
pub async fn permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
) -> axum::response::Response {
    match services.sessions.resolver().resolve(ctx.user_id(), ctx.scope()).await {
        Ok(codes) => errors::ok(codes),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /auth/menus - navigation of the current system
pub async fn menus(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
) -> axum::response::Response {
    let SystemScope::System(system) = ctx.scope() else {
        return errors::json_error(
            StatusCode::FORBIDDEN,
            "SYSTEM_CONTEXT_REQUIRED",
            "system context required; switch to a system first",
        );
    };

    match services.sessions.menus().user_tree(ctx.user_id(), system).await {
        Ok(tree) => errors::ok(tree),
        Err(e) => errors::auth_error_to_response(e),
    }
}
