use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::info;

use super::UpscaleError;

/// Blocking GET of a provider result. Anything but `200 OK` is a failed download.
pub fn download_result(url: &str, timeout: Duration) -> Result<Vec<u8>, UpscaleError> {
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| UpscaleError::Internal(format!("http client init failed: {e}")))?;
    let response = client
        .get(url)
        .send()
        .map_err(|e| UpscaleError::Internal(format!("result download failed: {e}")))?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(UpscaleError::DownloadFailed {
            status: status.as_u16(),
        });
    }
    let bytes = response
        .bytes()
        .map_err(|e| UpscaleError::Internal(format!("result body read failed: {e}")))?;
    info!(url, bytes = bytes.len(), "downloaded provider result");
    Ok(bytes.to_vec())
}
