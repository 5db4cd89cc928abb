pub mod replicate;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::upscale::normalize::ProviderOutput;

pub const STATUS_SUCCEEDED: &str = "succeeded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaleInput {
    pub image_path: PathBuf,
    pub scale: u8,
    pub face_enhance: bool,
}

/// A provider job as returned by the prediction lookup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl Prediction {
    pub fn is_succeeded(&self) -> bool {
        self.status == STATUS_SUCCEEDED
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    pub fn error_message(&self) -> String {
        match self.error.as_ref() {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Null) | None => String::from("no error detail"),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to read staged image: {0}")]
    ReadInput(#[source] std::io::Error),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("provider response decode failed: {0}")]
    Decode(String),
    #[error("prediction {id} {status}: {message}")]
    PredictionFailed {
        id: String,
        status: String,
        message: String,
    },
    #[error("prediction {id} did not finish within {timeout_secs}s")]
    Timeout { id: String, timeout_secs: u64 },
    #[error("{0}")]
    Message(String),
}

impl ProviderError {
    /// Whether the provider reported that an identical job already exists or
    /// is still running. Matches on message text only.
    pub fn indicates_duplicate_run(&self) -> bool {
        let text = self.to_string().to_lowercase();
        text.contains("already exists") || text.contains("currently running")
    }
}

/// Blocking client for the remote inference provider.
pub trait UpscaleProvider: Send + Sync + 'static {
    /// Runs the model on the staged image and waits for the job to finish.
    fn run(&self, input: &UpscaleInput) -> Result<ProviderOutput, ProviderError>;
    fn get_prediction(&self, prediction_id: &str) -> Result<Prediction, ProviderError>;
    fn client_version(&self) -> String;
}

pub type SharedUpscaleProvider = Arc<dyn UpscaleProvider>;
