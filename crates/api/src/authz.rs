//! Permission guard for handlers.
//!
//! Checks run against the credential's own scope: an `admin.*` permission is
//! only found after switching into the admin system.

use axum::http::StatusCode;
use axum::response::Response;

use portico_auth::{AuthError, Requirement};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::SessionContext;

/// Enforce `requirement` for the caller.
///
/// `Forbidden` becomes 403 `FORBIDDEN`; a resolver failure becomes 500
/// `PERMISSION_CHECK_FAILED` and is never reported as a denial.
pub async fn require(
    services: &AppServices,
    ctx: &SessionContext,
    requirement: Requirement,
) -> Result<(), Response> {
    match services
        .sessions
        .resolver()
        .authorize(ctx.user_id(), ctx.scope(), &requirement)
        .await
    {
        Ok(()) => Ok(()),
        Err(AuthError::Forbidden(missing)) => Err(errors::json_error(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            format!("missing permission '{missing}'"),
        )),
        Err(e) => Err(errors::auth_error_to_response(e)),
    }
}

/// Single-code shorthand for [`require`].
pub async fn require_permission(
    services: &AppServices,
    ctx: &SessionContext,
    code: &'static str,
) -> Result<(), Response> {
    require(services, ctx, Requirement::one(code)).await
}
