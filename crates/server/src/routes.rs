use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use printcast_core::error::ApiError;
use printcast_core::types::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/server/rtmp_streamer", get(get_status).post(run_operation))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Deserialize)]
struct OperationRequest {
    #[serde(default)]
    op: String,
}

/// Status object plus the last observed print state.
fn status_object(state: &AppState) -> Result<Map<String, Value>, AppError> {
    let status = state.orchestrator.status();
    let Value::Object(mut obj) = serde_json::to_value(&status)
        .map_err(|e| ApiError::Internal(format!("serialize status: {e}")))?
    else {
        return Err(ApiError::Internal("status is not an object".into()).into());
    };
    let print_state = *state.print_state.borrow();
    obj.insert("print_state".into(), Value::from(print_state.as_str()));
    Ok(obj)
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, AppError> {
    serde_json::to_value(v).map_err(|e| ApiError::Internal(format!("serialize: {e}")).into())
}

async fn get_status(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    Ok(Json(Value::Object(status_object(&state)?)))
}

async fn run_operation(
    State(state): State<AppState>,
    Json(body): Json<OperationRequest>,
) -> Result<Json<Value>, AppError> {
    let op: Operation = body.op.parse()?;
    info!(%op, "control operation");

    let orch = &state.orchestrator;
    let mut extra = Map::new();
    match op {
        Operation::Start => {
            let outcome = orch.start().await;
            extra.insert("outcome".into(), to_value(&outcome)?);
        }
        Operation::Stop => {
            let outcome = orch.stop().await;
            extra.insert("outcome".into(), to_value(&outcome)?);
        }
        Operation::Enable => orch.set_enabled(true),
        Operation::Disable => orch.set_enabled(false),
        Operation::IntroEnable => orch.set_intro_enabled(true),
        Operation::IntroDisable => orch.set_intro_enabled(false),
        Operation::OutroEnable => orch.set_outro_enabled(true),
        Operation::OutroDisable => orch.set_outro_enabled(false),
        Operation::PrepareMedia => {
            if let Value::Object(prepared) = to_value(&orch.prepare_media().await)? {
                extra = prepared;
            }
        }
    }

    let mut obj = Map::new();
    obj.insert("ok".into(), Value::Bool(true));
    obj.extend(status_object(&state)?);
    obj.extend(extra);
    Ok(Json(Value::Object(obj)))
}
