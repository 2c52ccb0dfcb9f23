//! Liveness endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::api::server::AppState;

/// GET /health: process is up; reports build version and model provider.
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.gateway.provider_name(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::server::tests::test_state;
    use crate::gateway::GatewayConfig;

    #[tokio::test]
    async fn test_health_reports_version_and_provider() {
        let state = Arc::new(test_state("{}", GatewayConfig::default()));
        let Json(body) = get_health(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["provider"], "fixed");
    }
}
