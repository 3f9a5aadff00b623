use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use isoport_backend_ort::{DetectorConfig, OrtBackend};
use isoport_core::{Backend, ImageSource, Job, Payload, SharedBackend, MAX_MESSAGE_BYTES};
use isoport_runtime::{Dispatcher, DispatcherConfig, Isolation};
use isoport_server::jsonrpc::{self, METHOD_NOT_FOUND, INVALID_PARAMS, PARSE_ERROR};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Reports the image source it was handed as `img_base64`.
struct Describe;

impl Backend for Describe {
    fn name(&self) -> &'static str {
        "describe"
    }

    fn accepts(&self, job: &Job) -> bool {
        matches!(job, Job::Detect(_))
    }

    fn run(&self, job: Job) -> Result<Payload> {
        let Job::Detect(job) = job else {
            anyhow::bail!("describe only detects");
        };
        let img_base64 = match job.image {
            ImageSource::Url(u) => format!("url:{u}"),
            ImageSource::Base64(_) => "base64".to_string(),
            ImageSource::LocalPath(p) => format!("path:{p}"),
        };
        Ok(Payload::Detection {
            delta_time: "0.0100".into(),
            img_base64,
        })
    }
}

fn app(backend: SharedBackend) -> Router {
    let dispatcher = Dispatcher::new(DispatcherConfig::new(Isolation::Thread), backend);
    jsonrpc::router(Arc::new(dispatcher))
}

fn ort_app() -> (Router, tempfile::TempDir) {
    let resources = tempfile::tempdir().unwrap();
    let backend = OrtBackend::new(DetectorConfig::new(resources.path()));
    (app(Arc::new(backend)), resources)
}

async fn post(app: Router, uri: &str, body: impl Into<Body>) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn call(params: Value) -> String {
    json!({ "jsonrpc": "2.0", "method": "detect", "params": params, "id": 7 }).to_string()
}

#[tokio::test]
async fn unreachable_url_yields_exact_sentinel() {
    let (app, _resources) = ort_app();
    let (status, body) = post(
        app,
        "/",
        call(json!({
            "model": "yolov3",
            "confidence": 0.5,
            "map_names": {},
            "img_path": "http://127.0.0.1:9/missing.jpg",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "jsonrpc": "2.0",
            "result": { "delta_time": "Fail", "img_base64": "Fail" },
            "id": 7,
        })
    );
}

#[tokio::test]
async fn missing_model_file_yields_sentinel_on_bare_route() {
    let (app, resources) = ort_app();
    let image = resources.path().join("a.jpg");
    std::fs::write(&image, b"not really a jpeg").unwrap();

    let body = json!({
        "model": "yolov3",
        "confidence": 0.5,
        "image": { "path": image.to_str().unwrap() },
    });
    let (status, body) = post(app, "/detect", body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "delta_time": "Fail", "img_base64": "Fail" }));
}

#[tokio::test]
async fn success_passes_result_through() {
    let (_, body) = post(
        app(Arc::new(Describe)),
        "/",
        call(json!({ "model": "yolov3", "confidence": 0.5, "img_path": "https://x.org/cat.png" })),
    )
    .await;
    assert_eq!(
        body["result"],
        json!({ "delta_time": "0.0100", "img_base64": "url:https://x.org/cat.png" })
    );
}

#[tokio::test]
async fn long_img_path_is_treated_as_base64() {
    let (_, body) = post(
        app(Arc::new(Describe)),
        "/",
        call(json!({ "model": "yolov3", "confidence": 0.5, "img_path": "A".repeat(501) })),
    )
    .await;
    assert_eq!(body["result"]["img_base64"], "base64");
}

#[tokio::test]
async fn unknown_method_is_rpc_error() {
    let body = json!({ "jsonrpc": "2.0", "method": "classify", "params": {}, "id": "a" });
    let (_, body) = post(app(Arc::new(Describe)), "/", body.to_string()).await;
    assert_eq!(body["error"]["code"], METHOD_NOT_FOUND);
    assert_eq!(body["id"], "a");
}

#[tokio::test]
async fn malformed_params_are_rpc_error() {
    let (_, body) = post(app(Arc::new(Describe)), "/", call(json!({ "model": 3 }))).await;
    assert_eq!(body["error"]["code"], INVALID_PARAMS);
    assert_eq!(body["id"], 7);
}

#[tokio::test]
async fn unparseable_body_is_parse_error() {
    let (_, body) = post(app(Arc::new(Describe)), "/", "{nope").await;
    assert_eq!(body["error"]["code"], PARSE_ERROR);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn bare_route_rejects_bad_params_with_sentinel() {
    let (status, body) = post(app(Arc::new(Describe)), "/detect", "{}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "delta_time": "Fail", "img_base64": "Fail" }));
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let (status, _) = post(
        app(Arc::new(Describe)),
        "/",
        vec![b' '; MAX_MESSAGE_BYTES + 1],
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn string_confidence_still_runs_detection() {
    let (_, body) = post(
        app(Arc::new(Describe)),
        "/",
        call(json!({ "model": "yolov3", "confidence": "0.5", "img_path": "/srv/in.jpg" })),
    )
    .await;
    assert_eq!(
        body["result"],
        json!({ "delta_time": "0.0100", "img_base64": "path:/srv/in.jpg" })
    );
}
