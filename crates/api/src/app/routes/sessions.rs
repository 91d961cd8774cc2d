use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};

use portico_auth::{Page, Requirement};
use portico_core::{LogoutReason, SessionId};

use crate::app::{dto, errors, services::AppServices};
use crate::authz;
use crate::context::SessionContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_sessions))
        .route("/remote-logout", post(remote_logout))
        .route("/:id/history", get(switch_history))
}

/// GET /sessions?limit=&offset=&user_id=
pub async fn list_sessions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Query(query): Query<dto::SessionListQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&services, &ctx, "admin.session.view").await {
        return resp;
    }

    if let Some(user) = query.user_id {
        return match services.sessions.sessions_for_user(user).await {
            Ok(sessions) => errors::ok(sessions),
            Err(e) => errors::auth_error_to_response(e),
        };
    }

    match services
        .sessions
        .active_sessions(Page::new(query.limit, query.offset))
        .await
    {
        Ok(page) => errors::ok(page),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /sessions/:id/history - session admins and monitoring staff
pub async fn switch_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    let requirement = Requirement::any_of(["admin.session.view", "admin.monitoring.view"]);
    if let Err(resp) = authz::require(&services, &ctx, requirement).await {
        return resp;
    }

    match services.sessions.switch_history(SessionId::new(id)).await {
        Ok(history) => errors::ok(history),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /sessions/remote-logout
pub async fn remote_logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Json(body): Json<dto::RemoteLogoutRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&services, &ctx, "admin.session.delete").await {
        return resp;
    }

    match services
        .sessions
        .remote_logout(body.user_id, body.device_id, LogoutReason::Admin)
        .await
    {
        Ok(count) => errors::ok(dto::CountResponse { count }),
        Err(e) => errors::auth_error_to_response(e),
    }
}
