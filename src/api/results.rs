use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::api::error::ErrorKind;
use crate::api::server::AppState;
use crate::storage::mime_for_path;

use super::handler_utils::{error_response, internal_error};

const RESULT_NOT_FOUND_MESSAGE: &str = "Result not found";

/// Serves a stored result by filename. Names that could leave the results
/// area are answered exactly like missing files.
pub async fn get_result_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Response {
    let Some(path) = state.upscale.store().result_path(filename.as_str()) else {
        warn!(filename = %filename, "rejected unsafe result filename");
        return not_found();
    };

    match tokio::fs::read(path.as_path()).await {
        Ok(bytes) => {
            debug!(path = %path.display(), bytes = bytes.len(), "serving result");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, content_type_for(path.as_path(), bytes.as_slice()))],
                bytes,
            )
                .into_response()
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => not_found(),
        Err(error) => {
            internal_error(format!("failed to read result {}: {error}", path.display()))
                .into_response()
        }
    }
}

/// Stored names always carry the staging extension, so recognizable image
/// bytes decide the content type and the extension is only a fallback.
fn content_type_for(path: &std::path::Path, bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or_else(|_| mime_for_path(path))
}

fn not_found() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorKind::Validation,
        "not_found",
        RESULT_NOT_FOUND_MESSAGE,
    )
    .into_response()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::content_type_for;

    #[test]
    fn sniffed_format_wins_over_extension() {
        let jpeg_magic = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];
        assert_eq!(content_type_for(Path::new("r.png"), &jpeg_magic), "image/jpeg");
        assert_eq!(content_type_for(Path::new("r.png"), b"opaque"), "image/png");
        assert_eq!(
            content_type_for(Path::new("r.bin"), b"opaque"),
            "application/octet-stream"
        );
    }
}
