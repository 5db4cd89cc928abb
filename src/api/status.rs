use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::api::server::AppState;

use super::handler_utils::{into_json, ApiObject};

#[derive(Debug, Clone, Serialize)]
struct ModelInfo {
    model: String,
    version: String,
}

#[derive(Debug, Clone, Serialize)]
struct StatusResponse {
    status: &'static str,
    api_token_status: &'static str,
    model_info: ModelInfo,
    service_version: &'static str,
    rust_version: &'static str,
    provider_client_version: String,
    started_unix_ms: u64,
}

pub async fn status_handler(State(state): State<AppState>) -> ApiObject<Value> {
    let api_token_status = if state.config.has_api_token() {
        "OK"
    } else {
        "MISSING"
    };

    (
        StatusCode::OK,
        into_json(StatusResponse {
            status: "online",
            api_token_status,
            model_info: ModelInfo {
                model: state.config.model.model.clone(),
                version: state.config.model.version.clone(),
            },
            service_version: state.service_version,
            rust_version: env!("UPSCALE_RUSTC_VERSION"),
            provider_client_version: state
                .upscale
                .provider_client_version()
                .unwrap_or_else(|| String::from("unknown")),
            started_unix_ms: state.started_unix_ms,
        }),
    )
}
