mod download;
mod records;
mod review;
mod upload;

pub use download::*;
pub use records::*;
pub use review::*;
pub use upload::*;

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::AppError;
use crate::ids::UserId;

/// Header set by the authenticating proxy in front of the portal.
pub const USER_HEADER: &str = "x-user-id";

fn user_from_parts(parts: &Parts) -> Option<UserId> {
    parts
        .headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(UserId)
}

/// The requesting user, if any.
#[derive(Debug, Clone, Copy)]
pub struct Viewer(pub Option<UserId>);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Viewer(user_from_parts(parts)))
    }
}

/// A user is required; anonymous requests get 401.
#[derive(Debug, Clone, Copy)]
pub struct LoggedIn(pub UserId);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for LoggedIn {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_parts(parts).map(LoggedIn).ok_or(AppError::Unauthorized)
    }
}

pub(crate) fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

pub(crate) fn attachment(payload: Vec<u8>, filename: &str, content_type: &str) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(payload))
        .map(IntoResponse::into_response)
        .unwrap_or_else(|e| json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))
}
