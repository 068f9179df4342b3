use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{error, info};

use atomflow_core::error::{AtomflowError, FailureClass};
use atomflow_core::types::ChainResult;

use crate::state::AppState;

// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// GET / (engine status, including which backends are degraded)
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let backends = state.executor.backends().status();
    Json(serde_json::json!({
        "service": "atomflow",
        "version": env!("CARGO_PKG_VERSION"),
        "status": if backends.degraded() { "degraded" } else { "ok" },
        "started_at": state.started_at.to_rfc3339(),
        "backends": {
            "model": backends.model,
            "graph": backends.graph,
            "cache": backends.cache,
        },
    }))
}

// GET /api/metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "workflows": state.metrics.snapshot() }))
}

#[derive(Deserialize)]
pub struct RunChainBody {
    #[serde(alias = "workflow_id")]
    pub chain_id: String,
    #[serde(default = "empty_trigger")]
    pub trigger_input: serde_json::Value,
}

fn empty_trigger() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// A failed run, rendered as `{error, status}` with a matching HTTP code.
pub struct ApiError(pub AtomflowError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let class = self.0.classify();
        let code = match class {
            FailureClass::NotFound => StatusCode::NOT_FOUND,
            FailureClass::BadInput => StatusCode::BAD_REQUEST,
            FailureClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "status": class.as_str(),
        });
        (code, Json(body)).into_response()
    }
}

// POST /api/v1/run_chain
//
// The run executes on its own task. If the client goes away the handler
// future is dropped, the guard cancels the run's token and the run ends
// as cancelled instead of being abandoned mid-step.
pub async fn run_chain(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RunChainBody>, JsonRejection>,
) -> Result<Json<ChainResult>, ApiError> {
    let Json(body) =
        payload.map_err(|rejection| ApiError(AtomflowError::InvalidRequest(rejection.body_text())))?;
    info!(workflow = %body.chain_id, "Chain requested");

    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();
    let executor = state.executor.clone();
    let run = tokio::spawn(async move {
        executor
            .run_chain(&body.chain_id, body.trigger_input, cancel)
            .await
    });

    match run.await {
        Ok(result) => result.map(Json).map_err(ApiError),
        Err(e) => {
            error!(error = %e, "Chain task did not finish");
            Err(ApiError(AtomflowError::Cancelled))
        }
    }
}
