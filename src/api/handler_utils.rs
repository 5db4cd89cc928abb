use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::api::error::ErrorKind;
use crate::upscale::UpscaleError;

pub type ApiObject<T> = (StatusCode, Json<T>);

pub const DUPLICATE_RUN_MESSAGE: &str =
    "The upscale job is already running or has already finished. Check the prediction history in your provider account.";

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
    error_kind: ErrorKind,
    error_code: String,
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    (
        status,
        into_json(ErrorResponse {
            error: message.into(),
            error_kind: kind,
            error_code: code.into(),
        }),
    )
}

pub fn map_upscale_error(error: UpscaleError) -> ApiObject<Value> {
    match error {
        UpscaleError::MissingInput(message) => error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "missing_input",
            message,
        ),
        UpscaleError::InvalidRequest(message) => error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "invalid_request",
            message,
        ),
        UpscaleError::ProviderUnavailable => {
            warn!("provider request refused: REPLICATE_API_TOKEN is not configured");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Infra,
                "provider_unavailable",
                "Provider API token is not configured",
            )
        }
        UpscaleError::ProviderCallFailed(source) if source.indicates_duplicate_run() => {
            warn!(error = %source, "provider reports the job is already running");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Provider,
                "prediction_in_flight",
                DUPLICATE_RUN_MESSAGE,
            )
        }
        UpscaleError::ProviderCallFailed(source) => {
            error!(error = %source, "provider call failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Provider,
                "provider_call_failed",
                format!("Provider API error: {source}"),
            )
        }
        UpscaleError::UnrecognizedOutputFormat(source) => {
            error!(error = %source, "provider output could not be normalized");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Provider,
                "unrecognized_output_format",
                "Unrecognized output format from provider",
            )
        }
        UpscaleError::DownloadFailed { status } => {
            error!(status, "result download failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Provider,
                "download_failed",
                "Failed to download result",
            )
        }
        UpscaleError::Internal(message) => internal_error(message),
    }
}

/// 500 carrying the raw failure text, so callers can diagnose provider and
/// decode problems without server access.
pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        detail,
    )
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).expect("api payload should serialize"))
}
