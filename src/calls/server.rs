//! 电话服务 HTTP 接口（axum）
//!
//! - GET  /health
//! - POST /start_call：发起外呼并阻塞到结果（400 请求无效 / 502 外呼失败 / 504 超时）
//! - POST /postcall：服务商的通话结束 webhook
//! - GET  /metrics：计数快照
//! - GET  /calls/:call_id：已发起通话的记录

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::calls::{CallError, CallRequest, CallService, CallbackError, MetricsSnapshot};

pub fn create_router(service: Arc<CallService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/start_call", post(start_call))
        .route("/postcall", post(postcall))
        .route("/metrics", get(metrics))
        .route("/calls/:call_id", get(call_record))
        .with_state(service)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "butler-calls",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

fn status_for(e: &CallError) -> StatusCode {
    match e {
        CallError::InvalidRequest(_) | CallError::Payload(_) => StatusCode::BAD_REQUEST,
        CallError::Placement(_) => StatusCode::BAD_GATEWAY,
        CallError::Callback(CallbackError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        CallError::Callback(_) => StatusCode::BAD_GATEWAY,
    }
}

async fn start_call(State(service): State<Arc<CallService>>, body: Bytes) -> Response {
    let request: CallRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Invalid call request: {e}")),
    };

    match service.start_and_wait(request).await {
        Ok(result) => Json(result).into_response(),
        Err(CallError::Callback(CallbackError::Timeout { key, .. })) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({
                "detail": "Timed out waiting for post-call result",
                "call_id": key,
            })),
        )
            .into_response(),
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}

async fn metrics(State(service): State<Arc<CallService>>) -> Json<MetricsSnapshot> {
    Json(service.metrics())
}

async fn call_record(
    State(service): State<Arc<CallService>>,
    Path(call_id): Path<String>,
) -> Response {
    match service.call(&call_id) {
        Some(record) => Json(record).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("Unknown call {call_id}")),
    }
}

async fn postcall(State(service): State<Arc<CallService>>, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {e}")),
    };

    match service.handle_postcall(&payload) {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}
