pub mod ai;
pub mod health;
pub mod records;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::StockdeskError;

/// Turn a body rejection into the structured error shape. Oversized bodies
/// keep axum's own 413.
pub(crate) fn json_rejection(rejection: JsonRejection) -> Response {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return rejection.into_response();
    }
    StockdeskError::InvalidRequest(rejection.body_text()).into_response()
}
