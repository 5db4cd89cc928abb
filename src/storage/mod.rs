use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("filesystem error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing unsafe result filename '{0}'")]
    UnsafeFilename(String),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Flat staging and results directories keyed by generated filenames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStore {
    upload_dir: PathBuf,
    results_dir: PathBuf,
}

impl ImageStore {
    pub fn new(upload_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            results_dir: results_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.upload_dir(), config.results_dir())
    }

    pub fn initialize(&self) -> Result<(), StorageError> {
        for dir in [self.upload_dir.as_path(), self.results_dir.as_path()] {
            fs::create_dir_all(dir).map_err(|source| StorageError::io(dir, source))?;
        }
        Ok(())
    }

    pub fn upload_dir(&self) -> &Path {
        self.upload_dir.as_path()
    }

    pub fn results_dir(&self) -> &Path {
        self.results_dir.as_path()
    }

    /// Writes `bytes` under a fresh generated name. The returned guard deletes
    /// the file when dropped, including when the write itself fails midway.
    pub fn stage_upload(&self, bytes: &[u8]) -> Result<StagedUpload, StorageError> {
        fs::create_dir_all(self.upload_dir.as_path())
            .map_err(|source| StorageError::io(self.upload_dir.as_path(), source))?;
        let filename = generate_image_filename();
        let staged = StagedUpload {
            path: self.upload_dir.join(filename.as_str()),
            filename,
        };
        fs::write(staged.path.as_path(), bytes)
            .map_err(|source| StorageError::io(staged.path.as_path(), source))?;
        debug!(path = %staged.path.display(), bytes = bytes.len(), "staged upload");
        Ok(staged)
    }

    pub fn write_result(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self
            .result_path(filename)
            .ok_or_else(|| StorageError::UnsafeFilename(filename.to_string()))?;
        fs::create_dir_all(self.results_dir.as_path())
            .map_err(|source| StorageError::io(self.results_dir.as_path(), source))?;
        fs::write(path.as_path(), bytes).map_err(|source| StorageError::io(path.as_path(), source))?;
        Ok(path)
    }

    /// Location of a stored result, or `None` when `filename` could escape the results area.
    pub fn result_path(&self, filename: &str) -> Option<PathBuf> {
        is_safe_filename(filename).then(|| self.results_dir.join(filename))
    }
}

/// An uploaded image on disk for the lifetime of one request.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
    filename: String,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn filename(&self) -> &str {
        self.filename.as_str()
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        match fs::remove_file(self.path.as_path()) {
            Ok(()) => debug!(path = %self.path.display(), "removed staged upload"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!(
                path = %self.path.display(),
                error = %error,
                "failed to remove staged upload"
            ),
        }
    }
}

pub fn generate_image_filename() -> String {
    format!("{}.png", Uuid::new_v4())
}

/// Deterministic result name for a provider job, e.g. `history_abc123.png`.
pub fn history_result_filename(prediction_id: &str) -> String {
    let id = sanitize_id(prediction_id);
    if id.is_empty() {
        return String::from("history_prediction.png");
    }
    format!("history_{id}.png")
}

pub fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && filename
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|v| v.to_str())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

fn sanitize_id(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            out.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}
