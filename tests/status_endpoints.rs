use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use upscale_backend::api::server::build_router_with_provider;
use upscale_backend::config::AppConfig;
use upscale_backend::provider::{
    Prediction, ProviderError, SharedUpscaleProvider, UpscaleInput, UpscaleProvider,
};
use upscale_backend::upscale::normalize::ProviderOutput;

#[tokio::test]
async fn status_reports_missing_token_and_model() {
    let (_root, app) = test_app(false);

    let response = send(app, Method::GET, "/api/status", StatusCode::OK).await;
    let payload = json_body(response).await;

    assert_eq!(payload["status"], json!("online"));
    assert_eq!(payload["api_token_status"], json!("MISSING"));
    assert_eq!(
        payload["model_info"],
        json!({
            "model": "nightmareai/real-esrgan",
            "version": "f121d640bd286e1fdc67f9799164c1d5be36ff74576ee11c803ae5b665dd46aa"
        })
    );
    assert_eq!(payload["provider_client_version"], json!("unknown"));
    assert_eq!(payload["service_version"], json!(env!("CARGO_PKG_VERSION")));

    let rust_version = payload["rust_version"]
        .as_str()
        .expect("rust_version should be a string");
    assert!(
        rust_version.starts_with("rustc ") || rust_version == "unknown",
        "unexpected toolchain version: {rust_version}"
    );
    assert_ne!(rust_version, env!("CARGO_PKG_RUST_VERSION"));
}

#[tokio::test]
async fn status_reports_configured_token_and_client() {
    let (_root, app) = test_app(true);

    let response = send(app, Method::GET, "/api/status", StatusCode::OK).await;
    let payload = json_body(response).await;

    assert_eq!(payload["api_token_status"], json!("OK"));
    assert_eq!(payload["provider_client_version"], json!("stub/1"));
    assert!(payload.get("api_token").is_none());
}

#[tokio::test]
async fn health_reports_service_identity() {
    let (_root, app) = test_app(false);

    let response = send(app, Method::GET, "/health", StatusCode::OK).await;
    let payload = json_body(response).await;

    assert_eq!(payload["ok"], json!(true));
    assert_eq!(payload["service"], json!("upscale-backend"));
    assert!(payload["started_unix_ms"].as_u64().is_some());
}

#[tokio::test]
async fn stored_results_are_served_with_image_content_type() {
    let (root, app) = test_app(false);
    let results = root.join("results");
    std::fs::create_dir_all(results.as_path()).expect("results dir should be creatable");
    std::fs::write(results.join("done.png"), b"\x89PNG fake").expect("result should write");

    let response = send(
        app,
        Method::GET,
        "/api/results/done.png",
        StatusCode::OK,
    )
    .await;
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("image/png")
    );
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    assert_eq!(body.as_ref(), b"\x89PNG fake");
}

#[tokio::test]
async fn jpeg_results_are_served_as_jpeg_despite_png_name() {
    let (root, app) = test_app(false);
    let results = root.join("results");
    std::fs::create_dir_all(results.as_path()).expect("results dir should be creatable");
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(6, 4))
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .expect("jpeg should encode");
    std::fs::write(results.join("history_p1.png"), jpeg.as_slice()).expect("result should write");

    let response = send(
        app,
        Method::GET,
        "/api/results/history_p1.png",
        StatusCode::OK,
    )
    .await;
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("image/jpeg")
    );
}

#[tokio::test]
async fn unknown_and_unsafe_result_names_are_not_found() {
    let (root, app) = test_app(false);
    std::fs::write(root.join("secret.png"), b"outside").expect("file should write");

    let response = send(
        app.clone(),
        Method::GET,
        "/api/results/nope.png",
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(json_body(response).await["error"], json!("Result not found"));

    let response = send(
        app,
        Method::GET,
        "/api/results/..%2Fsecret.png",
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(json_body(response).await["error_code"], json!("not_found"));
}

#[tokio::test]
async fn responses_carry_security_and_cors_headers() {
    let (_root, app) = test_app(false);

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/status")
        .header("origin", "https://frontend.example")
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    assert_eq!(response.status(), StatusCode::OK);

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    assert_eq!(header("x-content-type-options").as_deref(), Some("nosniff"));
    assert_eq!(header("x-frame-options").as_deref(), Some("SAMEORIGIN"));
    assert_eq!(
        header("referrer-policy").as_deref(),
        Some("strict-origin-when-cross-origin")
    );
    assert_eq!(
        header("content-security-policy").as_deref(),
        Some("default-src 'self'")
    );
    assert!(header("strict-transport-security").is_some());
    assert_eq!(header("access-control-allow-origin").as_deref(), Some("*"));
}

#[tokio::test]
async fn cors_preflight_is_answered() {
    let (_root, app) = test_app(false);

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/upscale")
        .header("origin", "https://frontend.example")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("access-control-allow-methods"));
}

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    expected_status: StatusCode,
) -> axum::response::Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    assert_eq!(response.status(), expected_status);
    response
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(body.as_ref()).expect("response should be valid JSON")
}

fn test_app(with_token: bool) -> (PathBuf, Router) {
    let root = std::env::temp_dir().join(format!("status_endpoints_test_{}", Uuid::new_v4()));
    std::fs::create_dir_all(root.as_path()).expect("temp test root must be creatable");
    let mut config = AppConfig::with_data_dir(root.as_path());
    let mut provider = None;
    if with_token {
        config = config.with_api_token("r8_test_token_value");
        provider = Some(Arc::new(StubProvider) as SharedUpscaleProvider);
    }
    (root, build_router_with_provider(config, provider))
}

struct StubProvider;

impl UpscaleProvider for StubProvider {
    fn run(&self, _input: &UpscaleInput) -> Result<ProviderOutput, ProviderError> {
        Err(ProviderError::Message(String::from("stub")))
    }

    fn get_prediction(&self, _prediction_id: &str) -> Result<Prediction, ProviderError> {
        Err(ProviderError::Message(String::from("stub")))
    }

    fn client_version(&self) -> String {
        String::from("stub/1")
    }
}
