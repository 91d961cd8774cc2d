use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{DeviceContext, SessionContext};

pub const DEVICE_UID_HEADER: &str = "x-device-uid";
pub const PLATFORM_HEADER: &str = "x-platform";

/// Verify the bearer credential against its live session.
///
/// On success the session's activity is stamped in the background and a
/// [`SessionContext`] is attached to the request.
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = match extract_bearer(req.headers()) {
        Some(token) => token.to_string(),
        None => {
            return errors::json_error(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "missing or malformed Authorization header",
            );
        }
    };

    let auth = match services.sessions.authenticate(&token).await {
        Ok(auth) => auth,
        Err(e) => return errors::auth_error_to_response(e),
    };

    // Detached: never awaited by the request.
    let _ = services.sessions.touch(auth.session_id());

    req.extensions_mut().insert(SessionContext::new(auth));
    next.run(req).await
}

/// Require `X-Device-UID` and `X-Platform` and an active registered device.
pub async fn device_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(device_uid) = header_value(req.headers(), DEVICE_UID_HEADER) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "DEVICE_UID_REQUIRED",
            "X-Device-UID header is required",
        );
    };
    let Some(platform) = header_value(req.headers(), PLATFORM_HEADER) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "PLATFORM_REQUIRED", "X-Platform header is required");
    };

    let device = match services.devices.verify(&device_uid).await {
        Ok(device) => device,
        Err(e) => return errors::auth_error_to_response(e),
    };
    let _ = services.devices.heartbeat(&device_uid);

    req.extensions_mut().insert(DeviceContext::new(device, platform));
    next.run(req).await
}

/// Reject requests whose credential carries no system.
pub async fn require_system_context(req: Request, next: Next) -> Response {
    let has_system = req
        .extensions()
        .get::<SessionContext>()
        .is_some_and(|ctx| ctx.system_id().is_some());
    if !has_system {
        return errors::json_error(
            StatusCode::FORBIDDEN,
            "SYSTEM_CONTEXT_REQUIRED",
            "system context required; switch to a system first",
        );
    }
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Best-effort client address from proxy headers.
pub fn client_ip(headers: &HeaderMap) -> String {
    header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .or_else(|| header_value(headers, "x-real-ip"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer(&headers), Some("abc.def"));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&headers), None);
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers), "10.0.0.9");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.4, 10.0.0.1"));
        assert_eq!(client_ip(&headers), "203.0.113.4");
    }
}
