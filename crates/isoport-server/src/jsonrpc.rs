//! JSON-RPC 2.0 front for object detection.
//!
//! Detection failures never surface as JSON-RPC errors: callers get the
//! `"Fail"` sentinel result and the cause is logged here. Only protocol-level
//! problems (bad JSON, unknown method, bad params) use the error object.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use isoport_core::{DetectionJob, ImageSource, Job, Payload, MAX_MESSAGE_BYTES};
use isoport_runtime::Dispatcher;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

const FAIL: &str = "Fail";

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", post(rpc))
        .route("/detect", post(detect_bare))
        .layer(DefaultBodyLimit::max(MAX_MESSAGE_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

#[derive(Debug, Deserialize)]
pub struct DetectParams {
    pub model: String,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub confidence: f32,
    #[serde(default)]
    pub map_names: BTreeMap<u32, String>,
    #[serde(default)]
    pub img_path: Option<String>,
    #[serde(default)]
    pub image: Option<ImageSource>,
}

/// Older clients send `"confidence": "0.5"`.
fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Number(f32),
        Text(String),
    }

    match Loose::deserialize(deserializer)? {
        Loose::Number(value) => Ok(value),
        Loose::Text(text) => text.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!("confidence is not a number: {text:?}"))
        }),
    }
}

impl DetectParams {
    /// An explicit `image` wins over the legacy `img_path`.
    pub fn into_job(self) -> Result<Job, String> {
        let image = match (self.image, self.img_path) {
            (Some(image), _) => image,
            (None, Some(raw)) => ImageSource::classify_legacy(&raw),
            (None, None) => return Err("missing img_path or image".to_string()),
        };
        Ok(Job::Detect(DetectionJob {
            model: self.model,
            confidence: self.confidence,
            map_names: self.map_names,
            image,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectResult {
    pub delta_time: String,
    pub img_base64: String,
}

impl DetectResult {
    pub fn fail() -> Self {
        Self {
            delta_time: FAIL.to_string(),
            img_base64: FAIL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: Option<String>,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Value,
}

fn rpc_result(id: Value, result: impl Serialize) -> Json<Value> {
    Json(json!({ "jsonrpc": "2.0", "result": result, "id": id }))
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message.into() },
        "id": id,
    }))
}

async fn rpc(State(dispatcher): State<Arc<Dispatcher>>, body: Bytes) -> Json<Value> {
    let request: RpcRequest = match serde_json::from_slice::<Value>(&body) {
        Err(err) => return rpc_error(Value::Null, PARSE_ERROR, format!("parse error: {err}")),
        Ok(value) => {
            let id = value.get("id").cloned().unwrap_or(Value::Null);
            match serde_json::from_value(value) {
                Ok(request) => request,
                Err(err) => return rpc_error(id, INVALID_REQUEST, format!("invalid request: {err}")),
            }
        }
    };
    if request.jsonrpc.as_deref().is_some_and(|v| v != "2.0") {
        return rpc_error(request.id, INVALID_REQUEST, "unsupported jsonrpc version");
    }
    if request.method != "detect" {
        return rpc_error(
            request.id,
            METHOD_NOT_FOUND,
            format!("method not found: {}", request.method),
        );
    }

    let job = match parse_params(request.params) {
        Ok(job) => job,
        Err(message) => return rpc_error(request.id, INVALID_PARAMS, message),
    };
    rpc_result(request.id, detect(&dispatcher, job).await)
}

async fn detect_bare(
    State(dispatcher): State<Arc<Dispatcher>>,
    body: Bytes,
) -> (StatusCode, Json<DetectResult>) {
    let params = serde_json::from_slice::<Value>(&body).map_err(|err| err.to_string());
    match params.and_then(parse_params) {
        Ok(job) => (StatusCode::OK, Json(detect(&dispatcher, job).await)),
        Err(message) => {
            debug!(%message, "rejected detect params");
            (StatusCode::BAD_REQUEST, Json(DetectResult::fail()))
        }
    }
}

fn parse_params(params: Value) -> Result<Job, String> {
    // Positional form: a single params object in an array.
    let params = match params {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    };
    serde_json::from_value::<DetectParams>(params)
        .map_err(|err| format!("invalid params: {err}"))?
        .into_job()
}

pub async fn detect(dispatcher: &Dispatcher, job: Job) -> DetectResult {
    match dispatcher.dispatch(job).await {
        Ok(Payload::Detection {
            delta_time,
            img_base64,
        }) => DetectResult {
            delta_time,
            img_base64,
        },
        Ok(other) => {
            warn!(kind = other.kind(), "detection returned an unexpected payload");
            DetectResult::fail()
        }
        Err(err) => {
            warn!(error = %err, "detection failed");
            DetectResult::fail()
        }
    }
}
