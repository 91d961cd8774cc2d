//! Response envelope: `{success, data, error: {code, message}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use portico_auth::{AuthError, ErrorClass};

pub fn ok<T: Serialize>(data: T) -> Response {
    with_status(StatusCode::OK, data)
}

pub fn with_status<T: Serialize>(status: StatusCode, data: T) -> Response {
    (
        status,
        axum::Json(json!({
            "success": true,
            "data": data,
            "error": null,
        })),
    )
        .into_response()
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "data": null,
            "error": {
                "code": code,
                "message": message.into(),
            },
        })),
    )
        .into_response()
}

pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorClass::Forbidden => StatusCode::FORBIDDEN,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::BadRequest => StatusCode::BAD_REQUEST,
        ErrorClass::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn auth_error_to_response(err: AuthError) -> Response {
    let class = err.class();
    if class == ErrorClass::Infrastructure {
        tracing::error!(error = %err, "request failed");
    }
    json_error(status_for(class), err.code(), err.public_message())
}

pub fn bad_request(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
}
