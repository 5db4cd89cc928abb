use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use base64::prelude::{Engine as _, BASE64_STANDARD};
use reqwest::blocking::{Client, Response};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use super::{Prediction, ProviderError, UpscaleInput, UpscaleProvider};
use crate::config::{AppConfig, ModelRef};
use crate::upscale::normalize::{FileOutput, ProviderOutput};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Replicate predictions API client.
#[derive(Debug, Clone)]
pub struct ReplicateClient {
    api_base: String,
    api_token: String,
    model: ModelRef,
    timeout: Duration,
    poll_interval: Duration,
}

impl ReplicateClient {
    pub fn new(
        api_base: impl Into<String>,
        api_token: impl Into<String>,
        model: ModelRef,
        timeout: Duration,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_token: api_token.into(),
            model,
            timeout,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// `None` when no credential is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let token = config.api_token.clone()?;
        Some(Self::new(
            config.api_base.clone(),
            token,
            config.model.clone(),
            config.provider_timeout,
        ))
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn http_client(&self) -> Result<Client, ProviderError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProviderError::Request(format!("http client init failed: {e}")))
    }

    fn predictions_url(&self) -> Result<Url, ProviderError> {
        self.endpoint(&["predictions"])
    }

    fn prediction_url(&self, prediction_id: &str) -> Result<Url, ProviderError> {
        self.endpoint(&["predictions", prediction_id])
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = Url::parse(self.api_base.as_str())
            .map_err(|e| ProviderError::Request(format!("invalid api base '{}': {e}", self.api_base)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Request(format!("api base '{}' cannot hold a path", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn build_run_body(&self, input: &UpscaleInput, image_bytes: &[u8]) -> Value {
        json!({
            "version": self.model.version,
            "input": {
                "image": image_data_uri(image_bytes),
                "scale": input.scale,
                "face_enhance": input.face_enhance,
            }
        })
    }

    fn fetch_prediction(&self, client: &Client, prediction_id: &str) -> Result<Prediction, ProviderError> {
        let response = client
            .get(self.prediction_url(prediction_id)?)
            .bearer_auth(self.api_token.as_str())
            .send()
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        decode_prediction(response)
    }

    fn wait_for_completion(&self, client: &Client, mut prediction: Prediction) -> Result<Prediction, ProviderError> {
        let started = Instant::now();
        while !prediction.is_terminal() {
            if started.elapsed() >= self.timeout {
                return Err(ProviderError::Timeout {
                    id: prediction.id,
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            thread::sleep(self.poll_interval);
            debug!(id = %prediction.id, status = %prediction.status, "polling prediction");
            prediction = self.fetch_prediction(client, prediction.id.as_str())?;
        }
        Ok(prediction)
    }
}

impl UpscaleProvider for ReplicateClient {
    fn run(&self, input: &UpscaleInput) -> Result<ProviderOutput, ProviderError> {
        let image_bytes = fs::read(input.image_path.as_path()).map_err(ProviderError::ReadInput)?;
        let body = self.build_run_body(input, image_bytes.as_slice());
        let client = self.http_client()?;

        info!(model = %self.model.identifier(), scale = input.scale, face_enhance = input.face_enhance, "calling provider");
        let response = client
            .post(self.predictions_url()?)
            .bearer_auth(self.api_token.as_str())
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let prediction = decode_prediction(response)?;
        let prediction = self.wait_for_completion(&client, prediction)?;
        if !prediction.is_succeeded() {
            return Err(ProviderError::PredictionFailed {
                message: prediction.error_message(),
                id: prediction.id,
                status: prediction.status,
            });
        }
        Ok(output_from_prediction(prediction))
    }

    fn get_prediction(&self, prediction_id: &str) -> Result<Prediction, ProviderError> {
        let client = self.http_client()?;
        self.fetch_prediction(&client, prediction_id)
    }

    fn client_version(&self) -> String {
        format!("replicate-http/{}", api_version(self.api_base.as_str()))
    }
}

/// Top-level string outputs are file handles; everything else keeps its JSON shape.
pub fn output_from_prediction(prediction: Prediction) -> ProviderOutput {
    match prediction.output {
        Some(Value::String(url)) => ProviderOutput::Accessor(FileOutput::new(url)),
        Some(value) => ProviderOutput::from(value),
        None => ProviderOutput::Other(Value::Null),
    }
}

pub fn image_data_uri(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    format!("data:{mime};base64,{}", BASE64_STANDARD.encode(bytes))
}

fn decode_prediction(response: Response) -> Result<Prediction, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ProviderError::Http {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<Prediction>()
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

fn api_version(api_base: &str) -> &str {
    api_base
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| segment.starts_with('v'))
        .unwrap_or("unknown")
}
