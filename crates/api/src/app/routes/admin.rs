//! Grant administration routes.
//!
//! Every endpoint is guarded by an `admin.*` permission, so callers must hold a
//! system token for the admin system.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};

use portico_auth::Requirement;
use portico_core::{RoleId, SystemScope, UserId};

use crate::app::{dto, errors, services::AppServices};
use crate::authz;
use crate::context::SessionContext;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/menus/tree", get(menu_tree))
        .route("/roles/:id", delete(delete_role))
        .route("/roles/:id/permissions", put(replace_role_permissions))
        .route("/roles/:id/menus", put(replace_role_menus))
        .route("/users/:id/roles", put(replace_user_roles))
        .route("/permissions/sync", post(sync_permissions))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /menus/tree?system_id= - full navigation of a system, hidden nodes included
pub async fn menu_tree(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Query(query): Query<dto::MenuTreeQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&services, &ctx, "admin.menu.view").await {
        return resp;
    }

    match services.sessions.menus().system_tree(query.system_id).await {
        Ok(tree) => errors::ok(tree),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// DELETE /roles/:id - built-in roles are refused
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&services, &ctx, "admin.role.delete").await {
        return resp;
    }

    match services.admin.delete_role(RoleId::new(id)).await {
        Ok(()) => errors::with_status(StatusCode::OK, serde_json::json!({ "deleted": id })),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// PUT /roles/:id/permissions
pub async fn replace_role_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Path(id): Path<i64>,
    Json(body): Json<dto::RolePermissionsRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&services, &ctx, "admin.role.update").await {
        return resp;
    }

    match services
        .admin
        .replace_role_permissions(RoleId::new(id), &body.permission_ids)
        .await
    {
        Ok(()) => errors::ok(serde_json::json!({ "role_id": id, "permission_ids": body.permission_ids })),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// PUT /roles/:id/menus - needs both role update and menu visibility
pub async fn replace_role_menus(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Path(id): Path<i64>,
    Json(body): Json<dto::RoleMenusRequest>,
) -> axum::response::Response {
    let requirement = Requirement::all_of(["admin.role.update", "admin.menu.view"]);
    if let Err(resp) = authz::require(&services, &ctx, requirement).await {
        return resp;
    }

    match services.admin.replace_role_menus(RoleId::new(id), &body.menu_ids).await {
        Ok(()) => errors::ok(serde_json::json!({ "role_id": id, "menu_ids": body.menu_ids })),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// PUT /users/:id/roles - replace the user's roles in one scope
pub async fn replace_user_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Path(id): Path<i64>,
    Json(body): Json<dto::UserRolesRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&services, &ctx, "admin.user.update").await {
        return resp;
    }

    let scope = SystemScope::from_option(body.system_id);
    match services
        .admin
        .replace_user_roles(UserId::new(id), scope, &body.role_ids, body.organization_id)
        .await
    {
        Ok(assignments) => errors::ok(assignments),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /permissions/sync - create missing `{system}.{module}.{action}` codes
pub async fn sync_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<SessionContext>,
    Json(body): Json<dto::SyncPermissionsRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_permission(&services, &ctx, "admin.permission.create").await {
        return resp;
    }

    let scope = SystemScope::from_option(body.system_id);
    match services.sessions.resolver().sync_permissions(scope).await {
        Ok(created) => errors::ok(serde_json::json!({ "created": created })),
        Err(e) => errors::auth_error_to_response(e),
    }
}
