use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::api::server::AppState;
use crate::upscale::{UploadedImage, UpscaleError, UpscaleForm, MISSING_IMAGE_MESSAGE};

use super::handler_utils::{internal_error, into_json, map_upscale_error, ApiObject};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckHistoryRequest {
    #[serde(default)]
    pub prediction_id: Option<String>,
}

pub async fn upscale_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiObject<Value> {
    let form = match multipart {
        Ok(multipart) => match read_upscale_form(multipart).await {
            Ok(form) => form,
            Err(error) => {
                return map_upscale_error(UpscaleError::InvalidRequest(format!(
                    "could not read multipart body: {}",
                    error.body_text()
                )))
            }
        },
        Err(rejection) => {
            debug!(%rejection, "upscale request is not multipart");
            return map_upscale_error(UpscaleError::MissingInput(MISSING_IMAGE_MESSAGE));
        }
    };

    let service = state.upscale.clone();
    let result = tokio::task::spawn_blocking(move || service.upscale(form)).await;

    match result {
        Ok(Ok(outcome)) => (StatusCode::OK, into_json(outcome)),
        Ok(Err(error)) => map_upscale_error(error),
        Err(join_error) => internal_error(format!("upscale task failed: {join_error}")),
    }
}

pub async fn check_history_handler(
    State(state): State<AppState>,
    payload: Result<Json<CheckHistoryRequest>, JsonRejection>,
) -> ApiObject<Value> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!(%rejection, "history request body is not usable JSON");
            CheckHistoryRequest::default()
        }
    };

    let service = state.upscale.clone();
    let result = tokio::task::spawn_blocking(move || {
        service.check_history(request.prediction_id.as_deref())
    })
    .await;

    match result {
        Ok(Ok(outcome)) => (StatusCode::OK, into_json(outcome)),
        Ok(Err(error)) => map_upscale_error(error),
        Err(join_error) => internal_error(format!("history task failed: {join_error}")),
    }
}

/// Collects the `image` file part and the `scale` and `face_enhance` fields;
/// anything else is skipped. An `image` part without a filename is a plain
/// form value, not an upload. A repeated field keeps its last value.
async fn read_upscale_form(mut multipart: Multipart) -> Result<UpscaleForm, MultipartError> {
    let mut form = UpscaleForm::default();
    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("image") => {
                let Some(original_filename) = field.file_name().map(str::to_string) else {
                    debug!("ignoring image part sent without a filename");
                    continue;
                };
                let bytes = field.bytes().await?;
                form.image = Some(UploadedImage {
                    bytes: bytes.to_vec(),
                    original_filename: Some(original_filename),
                });
            }
            Some("scale") => form.scale = Some(field.text().await?),
            Some("face_enhance") => form.face_enhance = Some(field.text().await?),
            _ => {}
        }
    }
    Ok(form)
}
