//! Versioned record routes.
//!
//! `version` defaults to the current year on reads. Writes and deletes name
//! an exact version and reject requests without one.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::server::AppState;
use crate::clock::Clock;
use crate::error::StockdeskError;
use crate::store::{RecordFilter, Version};

use super::json_rejection;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub version: Option<Version>,
    pub token: Option<String>,
    pub keyword: Option<String>,
    pub attr: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    pub version: Option<Version>,
}

#[derive(Debug, Deserialize)]
pub struct PropagateBody {
    pub attribute: String,
    #[serde(default)]
    pub value: Value,
}

fn query_rejection(rejection: QueryRejection) -> Response {
    StockdeskError::InvalidRequest(rejection.body_text()).into_response()
}

fn version_required() -> Response {
    StockdeskError::InvalidRequest("version is required".to_string()).into_response()
}

/// GET /records: entities resolved at `version`, one page at a time.
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return query_rejection(rejection),
    };
    let version = query.version.unwrap_or_else(|| state.clock.year());
    let filter = RecordFilter {
        keyword: query.keyword,
        attribute: query.attr.map(|a| (a, Value::String(query.value.unwrap_or_default()))),
    };

    match state.store.query(version, query.token.as_deref(), &filter).await {
        Ok(page) => (StatusCode::OK, Json(json!(page))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /records/{entity_id}: one entity resolved at `version`.
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    query: Result<Query<VersionQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return query_rejection(rejection),
    };
    let version = query.version.unwrap_or_else(|| state.clock.year());

    match state.store.get(&entity_id, version).await {
        Ok(record) => (StatusCode::OK, Json(json!(record))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PUT /records/{entity_id}: upsert exactly one version.
///
/// Body is `{"version": 2024, "fields": {...}}`, or `version` alongside the
/// fields at top level.
pub async fn put_record(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return json_rejection(rejection),
    };
    let Value::Object(mut body) = body else {
        return StockdeskError::InvalidRequest("body must be an object".to_string())
            .into_response();
    };
    let Some(version) = body.remove("version").as_ref().and_then(parse_version) else {
        return version_required();
    };
    let fields: Map<String, Value> = match body.remove("fields") {
        Some(Value::Object(fields)) => fields,
        Some(_) => {
            return StockdeskError::InvalidRequest("fields must be an object".to_string())
                .into_response()
        }
        None => body,
    };

    match state.store.write(&entity_id, version, fields).await {
        Ok(record) => (StatusCode::OK, Json(json!(record))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /records/{entity_id}?version=: remove exactly one version.
pub async fn delete_record(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    query: Result<Query<VersionQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return query_rejection(rejection),
    };
    let Some(version) = query.version else {
        return version_required();
    };

    match state.store.delete(&entity_id, version).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /records/{entity_id}/propagate: set one attribute on every version.
///
/// 200 when every version was updated, 207 when some failed.
pub async fn propagate(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    body: Result<Json<PropagateBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return json_rejection(rejection),
    };

    match state
        .store
        .propagate_attribute(&entity_id, &body.attribute, body.value)
        .await
    {
        Ok(report) => {
            let status = if report.is_complete() {
                StatusCode::OK
            } else {
                StatusCode::MULTI_STATUS
            };
            (status, Json(json!(report))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn parse_version(value: &Value) -> Option<Version> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| Version::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
