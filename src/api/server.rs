use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::config::AppConfig;
use crate::provider::replicate::ReplicateClient;
use crate::provider::SharedUpscaleProvider;
use crate::storage::ImageStore;
use crate::upscale::UpscaleService;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u64,
    pub config: Arc<AppConfig>,
    pub upscale: UpscaleService,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: AppConfig, provider: Option<SharedUpscaleProvider>) -> Self {
        Self {
            service_name: "upscale-backend",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            upscale: UpscaleService::from_config(&config, provider),
            rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limits)),
            config: Arc::new(config),
        }
    }
}

/// Router wired to the Replicate client when a credential is configured.
pub fn build_router(config: AppConfig) -> Router {
    let provider = ReplicateClient::from_config(&config)
        .map(|client| Arc::new(client) as SharedUpscaleProvider);
    build_router_with_provider(config, provider)
}

pub fn build_router_with_provider(
    config: AppConfig,
    provider: Option<SharedUpscaleProvider>,
) -> Router {
    let state = AppState::new(config, provider);
    let max_upload_bytes = state.config.max_upload_bytes;

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/upscale", post(crate::api::upscale::upscale_handler))
        .route(
            "/api/check-history",
            post(crate::api::upscale::check_history_handler),
        )
        .route(
            "/api/results/{filename}",
            get(crate::api::results::get_result_handler),
        )
        .route("/api/status", get(crate::api::status::status_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    with_security_headers(router)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn with_security_headers(router: Router<AppState>) -> Router<AppState> {
    let headers = [
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
        (
            header::STRICT_TRANSPORT_SECURITY,
            "max-age=31536000; includeSubDomains",
        ),
        (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
        (header::CONTENT_SECURITY_POLICY, "default-src 'self'"),
    ];
    headers.into_iter().fold(router, |router, (name, value)| {
        router.layer(SetResponseHeaderLayer::if_not_present(
            name,
            HeaderValue::from_static(value),
        ))
    })
}

pub async fn serve(config: AppConfig) -> std::io::Result<()> {
    let addr = config.bind;
    let store = ImageStore::from_config(&config);
    store.initialize().map_err(std::io::Error::other)?;

    match config.masked_api_token() {
        Some(masked) => info!(token = %masked, "using provider API token"),
        None => warn!("REPLICATE_API_TOKEN is not set; upscale and history lookups are disabled"),
    }
    info!(
        model = %config.model.identifier(),
        uploads = %store.upload_dir().display(),
        results = %store.results_dir().display(),
        "provider model and storage"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(config);
    info!(bind = %addr, "starting upscale-backend HTTP surface");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
        })),
    )
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}
