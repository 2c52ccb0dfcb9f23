//! AI invocation route.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::identity::{family_code, CallerIdentity};
use crate::api::server::AppState;
use crate::gateway::InvocationRequest;

use super::json_rejection;

/// POST /ai/invoke: run one gateway invocation.
///
/// Returns the payload object with a `cached` flag merged in.
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    CallerIdentity(identity): CallerIdentity,
    headers: HeaderMap,
    payload: Result<Json<InvocationRequest>, JsonRejection>,
) -> Response {
    let Json(mut request) = match payload {
        Ok(p) => p,
        Err(rejection) => return json_rejection(rejection),
    };
    request.identity = identity;
    request.secret = family_code(&headers);

    match state.gateway.invoke(request).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome.into_body())).into_response(),
        Err(e) => e.into_response(),
    }
}
