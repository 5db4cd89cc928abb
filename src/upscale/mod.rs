pub mod download;
pub mod normalize;
pub mod params;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::provider::{ProviderError, SharedUpscaleProvider, UpscaleInput};
use crate::storage::{history_result_filename, ImageStore, StorageError};

use self::download::download_result;
use self::normalize::{normalize_output, NormalizeError, ProviderOutput};
use self::params::{ParamError, UpscaleParameters};

pub const MISSING_IMAGE_MESSAGE: &str = "No image provided";
pub const MISSING_PREDICTION_ID_MESSAGE: &str = "Prediction ID was not provided";

#[derive(Debug, Error)]
pub enum UpscaleError {
    #[error("{0}")]
    MissingInput(&'static str),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("provider API token is not configured")]
    ProviderUnavailable,
    #[error("provider call failed: {0}")]
    ProviderCallFailed(#[source] ProviderError),
    #[error(transparent)]
    UnrecognizedOutputFormat(#[from] NormalizeError),
    #[error("failed to download result (HTTP {status})")]
    DownloadFailed { status: u16 },
    #[error("{0}")]
    Internal(String),
}

impl From<StorageError> for UpscaleError {
    fn from(error: StorageError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<ParamError> for UpscaleError {
    fn from(error: ParamError) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<image::ImageError> for UpscaleError {
    fn from(error: image::ImageError) -> Self {
        Self::Internal(format!("failed to decode result image: {error}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub original_filename: Option<String>,
}

/// The multipart fields of an upscale request, as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpscaleForm {
    pub image: Option<UploadedImage>,
    pub scale: Option<String>,
    pub face_enhance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpscaleOutcome {
    pub success: bool,
    pub result_url: String,
    pub width: u32,
    pub height: u32,
    pub original_filename: Option<String>,
    pub scale: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HistoryOutcome {
    Downloaded {
        success: bool,
        status: String,
        result_url: String,
        width: u32,
        height: u32,
    },
    Unresolved {
        status: String,
        output: String,
        error: String,
    },
    NoOutput {
        status: String,
        output: String,
    },
    Pending {
        status: String,
        message: String,
    },
}

pub fn result_url_for(filename: &str) -> String {
    format!("/api/results/{filename}")
}

/// Runs the upscale and history flows. All methods block; call them from
/// `spawn_blocking`.
#[derive(Clone)]
pub struct UpscaleService {
    provider: Option<SharedUpscaleProvider>,
    store: Arc<ImageStore>,
    download_timeout: Duration,
}

impl UpscaleService {
    pub fn new(
        provider: Option<SharedUpscaleProvider>,
        store: Arc<ImageStore>,
        download_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            download_timeout,
        }
    }

    pub fn from_config(config: &AppConfig, provider: Option<SharedUpscaleProvider>) -> Self {
        Self::new(
            provider,
            Arc::new(ImageStore::from_config(config)),
            config.provider_timeout,
        )
    }

    pub fn store(&self) -> &ImageStore {
        self.store.as_ref()
    }

    pub fn provider_client_version(&self) -> Option<String> {
        self.provider.as_ref().map(|provider| provider.client_version())
    }

    pub fn upscale(&self, form: UpscaleForm) -> Result<UpscaleOutcome, UpscaleError> {
        let Some(image) = form.image else {
            return Err(UpscaleError::MissingInput(MISSING_IMAGE_MESSAGE));
        };
        let provider = self.provider()?;

        // Dropping `staged` deletes the upload on every path out of this function.
        let staged = self.store.stage_upload(image.bytes.as_slice())?;
        let params = UpscaleParameters::parse(form.scale.as_deref(), form.face_enhance.as_deref())?;

        let output = provider
            .run(&UpscaleInput {
                image_path: staged.path().to_path_buf(),
                scale: params.scale,
                face_enhance: params.face_enhance,
            })
            .map_err(UpscaleError::ProviderCallFailed)?;
        debug!(kind = output.kind(), raw = %output, "provider returned output");

        let url = normalize_output(&output)?;
        let (width, height) = self.fetch_and_store(url.as_str(), staged.filename())?;
        info!(
            filename = staged.filename(),
            width,
            height,
            scale = params.scale,
            "upscale finished"
        );

        Ok(UpscaleOutcome {
            success: true,
            result_url: result_url_for(staged.filename()),
            width,
            height,
            original_filename: image.original_filename,
            scale: params.scale,
        })
    }

    pub fn check_history(&self, prediction_id: Option<&str>) -> Result<HistoryOutcome, UpscaleError> {
        let provider = self.provider()?;
        let prediction_id = prediction_id
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(UpscaleError::MissingInput(MISSING_PREDICTION_ID_MESSAGE))?;

        let prediction = provider
            .get_prediction(prediction_id)
            .map_err(UpscaleError::ProviderCallFailed)?;
        if !prediction.is_succeeded() {
            return Ok(HistoryOutcome::Pending {
                message: format!("Prediction status: {}", prediction.status),
                status: prediction.status,
            });
        }

        let output = prediction
            .output
            .map(ProviderOutput::from)
            .unwrap_or(ProviderOutput::Other(serde_json::Value::Null));
        if output.is_empty() {
            return Ok(HistoryOutcome::NoOutput {
                status: prediction.status,
                output: output.to_string(),
            });
        }

        let url = match normalize_output(&output) {
            Ok(url) => url,
            Err(error) => {
                debug!(%error, "history output has no resolvable URL");
                return Ok(HistoryOutcome::Unresolved {
                    status: prediction.status,
                    output: output.to_string(),
                    error: String::from("Could not determine output URL"),
                });
            }
        };

        let filename = history_result_filename(prediction_id);
        let (width, height) = self.fetch_and_store(url.as_str(), filename.as_str())?;
        Ok(HistoryOutcome::Downloaded {
            success: true,
            status: prediction.status,
            result_url: result_url_for(filename.as_str()),
            width,
            height,
        })
    }

    fn provider(&self) -> Result<&SharedUpscaleProvider, UpscaleError> {
        self.provider.as_ref().ok_or(UpscaleError::ProviderUnavailable)
    }

    fn fetch_and_store(&self, url: &str, filename: &str) -> Result<(u32, u32), UpscaleError> {
        let bytes = download_result(url, self.download_timeout)?;
        self.store.write_result(filename, bytes.as_slice())?;
        let decoded = image::load_from_memory(bytes.as_slice())?;
        Ok((decoded.width(), decoded.height()))
    }
}
