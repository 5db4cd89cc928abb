mod dotenv;

use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_BIND: &str = "0.0.0.0:5000";
pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_MODEL: &str = "nightmareai/real-esrgan";
pub const DEFAULT_MODEL_VERSION: &str =
    "f121d640bd286e1fdc67f9799164c1d5be36ff74576ee11c803ae5b665dd46aa";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONFIG_PATH: &str = "config/upscale.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub model: String,
    pub version: String,
}

impl ModelRef {
    /// `owner/name:version`, the form the provider expects when pinning a version.
    pub fn identifier(&self) -> String {
        format!("{}:{}", self.model, self.version)
    }
}

impl Default for ModelRef {
    fn default() -> Self {
        Self {
            model: String::from(DEFAULT_MODEL),
            version: String::from(DEFAULT_MODEL_VERSION),
        }
    }
}

/// Per-client request ceilings. A zero disables that ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub upscale_per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            upscale_per_minute: 5,
            per_hour: 50,
            per_day: 200,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub api_token: Option<String>,
    pub api_base: String,
    pub model: ModelRef,
    pub max_upload_bytes: usize,
    pub provider_timeout: Duration,
    pub rate_limits: RateLimitConfig,
}

impl AppConfig {
    /// Built-in defaults rooted at `data_dir`, with no provider credential.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            data_dir: data_dir.into(),
            api_token: None,
            api_base: String::from(DEFAULT_API_BASE),
            model: ModelRef::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            rate_limits: RateLimitConfig::default(),
        }
    }

    pub fn with_api_token(mut self, api_token: impl Into<String>) -> Self {
        self.api_token = Some(api_token.into());
        self
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join("results")
    }

    pub fn has_api_token(&self) -> bool {
        self.api_token.is_some()
    }

    pub fn masked_api_token(&self) -> Option<String> {
        self.api_token.as_deref().map(mask_secret)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind", &self.bind)
            .field("data_dir", &self.data_dir)
            .field("api_token", &self.masked_api_token())
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("provider_timeout", &self.provider_timeout)
            .field("rate_limits", &self.rate_limits)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse config TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("config value {key}='{value}' is invalid: {message}")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub bind: Option<String>,
    pub data_dir: Option<String>,
    pub provider: ProviderFileSettings,
    pub limits: LimitFileSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderFileSettings {
    pub api_base: Option<String>,
    pub model: Option<String>,
    pub model_version: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitFileSettings {
    pub max_upload_bytes: Option<usize>,
    pub upscale_per_minute: Option<u32>,
    pub per_hour: Option<u32>,
    pub per_day: Option<u32>,
}

/// Resolves the process configuration: defaults, then the optional TOML file,
/// then `.env` in `work_dir`, then the process environment.
pub fn load_app_config(work_dir: &Path) -> Result<AppConfig, ConfigError> {
    let dotenv = dotenv::load_dotenv_map(work_dir).map_err(|error| ConfigError::ReadFile {
        path: work_dir.join(".env").display().to_string(),
        message: error.to_string(),
    })?;
    let lookup = |key: &str| {
        std::env::var(key)
            .ok()
            .or_else(|| dotenv.get(key).cloned())
    };
    let file = load_file_settings(work_dir, lookup("UPSCALE_CONFIG").as_deref())?;
    select_app_config(&file, lookup, work_dir)
}

pub fn load_file_settings(
    work_dir: &Path,
    explicit_path: Option<&str>,
) -> Result<FileSettings, ConfigError> {
    let explicit = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| resolve_under(work_dir, v));
    let path = match explicit {
        Some(path) => path,
        None => {
            let default_path = work_dir.join(DEFAULT_CONFIG_PATH);
            if !default_path.is_file() {
                return Ok(FileSettings::default());
            }
            default_path
        }
    };

    let raw = fs::read_to_string(path.as_path()).map_err(|error| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    toml::from_str::<FileSettings>(raw.as_str()).map_err(|error| ConfigError::ParseToml {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

pub fn select_app_config(
    file: &FileSettings,
    lookup: impl Fn(&str) -> Option<String>,
    work_dir: &Path,
) -> Result<AppConfig, ConfigError> {
    let value = |key: &str, from_file: Option<String>| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or(from_file)
    };

    let mut config = AppConfig::with_data_dir(work_dir);

    if let Some(raw) = value("UPSCALE_BACKEND_BIND", file.bind.clone()) {
        config.bind = parse_value("UPSCALE_BACKEND_BIND", raw.as_str())?;
    }
    if let Some(raw) = value("UPSCALE_DATA_DIR", file.data_dir.clone()) {
        config.data_dir = resolve_under(work_dir, raw.as_str());
    }
    config.api_token = lookup("REPLICATE_API_TOKEN")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if let Some(raw) = value("REPLICATE_API_BASE", file.provider.api_base.clone()) {
        url::Url::parse(raw.as_str()).map_err(|error| ConfigError::InvalidValue {
            key: String::from("REPLICATE_API_BASE"),
            value: raw.clone(),
            message: error.to_string(),
        })?;
        config.api_base = raw.trim_end_matches('/').to_string();
    }
    if let Some(raw) = value("UPSCALE_MODEL", file.provider.model.clone()) {
        config.model.model = raw;
    }
    if let Some(raw) = value("UPSCALE_MODEL_VERSION", file.provider.model_version.clone()) {
        config.model.version = raw;
    }

    let file_timeout = file.provider.timeout_secs.map(|v| v.to_string());
    if let Some(raw) = value("UPSCALE_PROVIDER_TIMEOUT_SECS", file_timeout) {
        let secs: u64 = parse_value("UPSCALE_PROVIDER_TIMEOUT_SECS", raw.as_str())?;
        if secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: String::from("UPSCALE_PROVIDER_TIMEOUT_SECS"),
                value: raw,
                message: String::from("must be at least 1"),
            });
        }
        config.provider_timeout = Duration::from_secs(secs);
    }

    let limits = &file.limits;
    if let Some(raw) = value(
        "UPSCALE_MAX_UPLOAD_BYTES",
        limits.max_upload_bytes.map(|v| v.to_string()),
    ) {
        config.max_upload_bytes = parse_value("UPSCALE_MAX_UPLOAD_BYTES", raw.as_str())?;
    }
    if let Some(raw) = value(
        "UPSCALE_RATE_UPSCALE_PER_MINUTE",
        limits.upscale_per_minute.map(|v| v.to_string()),
    ) {
        config.rate_limits.upscale_per_minute =
            parse_value("UPSCALE_RATE_UPSCALE_PER_MINUTE", raw.as_str())?;
    }
    if let Some(raw) = value("UPSCALE_RATE_PER_HOUR", limits.per_hour.map(|v| v.to_string())) {
        config.rate_limits.per_hour = parse_value("UPSCALE_RATE_PER_HOUR", raw.as_str())?;
    }
    if let Some(raw) = value("UPSCALE_RATE_PER_DAY", limits.per_day.map(|v| v.to_string())) {
        config.rate_limits.per_day = parse_value("UPSCALE_RATE_PER_DAY", raw.as_str())?;
    }

    Ok(config)
}

/// Keeps the first and last five characters of a secret, e.g. `r8_ab...vwxyz`.
pub fn mask_secret(secret: &str) -> String {
    let chars = secret.chars().collect::<Vec<_>>();
    if chars.len() <= 10 {
        return "*".repeat(chars.len());
    }
    let head = chars[..5].iter().collect::<String>();
    let tail = chars[chars.len() - 5..].iter().collect::<String>();
    format!("{head}...{tail}")
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            message: error.to_string(),
        })
}

fn resolve_under(root: &Path, value: &str) -> PathBuf {
    let candidate = PathBuf::from(value);
    if candidate.is_absolute() {
        candidate
    } else {
        root.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        let root = Path::new("/srv/upscale");
        let config = select_app_config(&FileSettings::default(), lookup_from(&[]), root)
            .expect("defaults should resolve");

        assert_eq!(config, AppConfig::with_data_dir(root));
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.upload_dir(), root.join("uploads"));
        assert_eq!(config.results_dir(), root.join("results"));
        assert!(!config.has_api_token());
        assert_eq!(
            config.model.identifier(),
            format!("{DEFAULT_MODEL}:{DEFAULT_MODEL_VERSION}")
        );
    }

    #[test]
    fn environment_overrides_file_settings() {
        let file = FileSettings {
            bind: Some(String::from("127.0.0.1:6000")),
            data_dir: Some(String::from("var/data")),
            provider: ProviderFileSettings {
                api_base: Some(String::from("https://file.example/v1/")),
                model: Some(String::from("file/model")),
                model_version: None,
                timeout_secs: Some(60),
            },
            limits: LimitFileSettings {
                max_upload_bytes: Some(1024),
                upscale_per_minute: Some(2),
                per_hour: None,
                per_day: None,
            },
        };
        let lookup = lookup_from(&[
            ("UPSCALE_BACKEND_BIND", "127.0.0.1:7000"),
            ("REPLICATE_API_TOKEN", "  r8_secret_token_value  "),
            ("UPSCALE_RATE_PER_DAY", "10"),
            ("UPSCALE_MODEL", "   "),
        ]);

        let config = select_app_config(&file, lookup, Path::new("/srv/upscale"))
            .expect("layered config should resolve");

        assert_eq!(config.bind.to_string(), "127.0.0.1:7000");
        assert_eq!(config.data_dir, PathBuf::from("/srv/upscale/var/data"));
        assert_eq!(config.api_token.as_deref(), Some("r8_secret_token_value"));
        assert_eq!(config.api_base, "https://file.example/v1");
        assert_eq!(config.model.model, "file/model");
        assert_eq!(config.model.version, DEFAULT_MODEL_VERSION);
        assert_eq!(config.provider_timeout, Duration::from_secs(60));
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(
            config.rate_limits,
            RateLimitConfig {
                upscale_per_minute: 2,
                per_hour: 50,
                per_day: 10,
            }
        );
    }

    #[test]
    fn invalid_values_are_reported_with_their_key() {
        let err = select_app_config(
            &FileSettings::default(),
            lookup_from(&[("UPSCALE_RATE_PER_HOUR", "lots")]),
            Path::new("/srv"),
        )
        .expect_err("non-numeric limit should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "UPSCALE_RATE_PER_HOUR"
        ));

        let err = select_app_config(
            &FileSettings::default(),
            lookup_from(&[("UPSCALE_PROVIDER_TIMEOUT_SECS", "0")]),
            Path::new("/srv"),
        )
        .expect_err("zero timeout should fail");
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn loads_toml_file_from_default_location() {
        let root = std::env::temp_dir().join(format!(
            "upscale_config_test_{}",
            uuid::Uuid::new_v4()
        ));
        fs::create_dir_all(root.join("config")).expect("config dir should be creatable");
        fs::write(
            root.join(DEFAULT_CONFIG_PATH),
            r#"
bind = "127.0.0.1:5050"

[provider]
timeout_secs = 45

[limits]
per_hour = 20
"#,
        )
        .expect("config file should be writable");

        let settings = load_file_settings(root.as_path(), None).expect("toml should parse");
        assert_eq!(settings.bind.as_deref(), Some("127.0.0.1:5050"));
        assert_eq!(settings.provider.timeout_secs, Some(45));
        assert_eq!(settings.limits.per_hour, Some(20));

        fs::write(root.join("bad.toml"), "unknown_key = 1").expect("bad file should be writable");
        let err = load_file_settings(root.as_path(), Some("bad.toml"))
            .expect_err("unknown keys should be rejected");
        assert!(matches!(err, ConfigError::ParseToml { .. }));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn secrets_are_masked_for_logs() {
        assert_eq!(mask_secret("r8_abcdefghijklmnopqrstuvwxyz"), "r8_ab...vwxyz");
        assert_eq!(mask_secret("short"), "*****");

        let config = AppConfig::with_data_dir("/srv").with_api_token("r8_abcdefghijklmnopqrstuvwxyz");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("fghijklmnop"));
        assert!(rendered.contains("r8_ab...vwxyz"));
    }
}
