use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// A file handle returned by the provider. Its URL is read through
/// [`FileOutput::url`], which can fail when the handle does not carry a
/// well-formed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutput {
    raw: String,
}

impl FileOutput {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn url(&self) -> Result<Url, url::ParseError> {
        Url::parse(self.raw.trim())
    }
}

impl fmt::Display for FileOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw.as_str())
    }
}

/// Every shape the provider is known to hand back for a finished prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutput {
    Accessor(FileOutput),
    Sequence(Vec<Value>),
    String(String),
    Mapping(Map<String, Value>),
    Other(Value),
}

impl ProviderOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Accessor(_) => "accessor",
            Self::Sequence(_) => "sequence",
            Self::String(_) => "string",
            Self::Mapping(_) => "mapping",
            Self::Other(_) => "other",
        }
    }

    /// Null, empty strings, empty sequences and empty mappings carry nothing to download.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Accessor(file) => file.raw.is_empty(),
            Self::Sequence(items) => items.is_empty(),
            Self::String(text) => text.is_empty(),
            Self::Mapping(map) => map.is_empty(),
            Self::Other(value) => match value {
                Value::Null => true,
                Value::Bool(flag) => !flag,
                Value::Number(number) => number.as_f64() == Some(0.0),
                Value::String(text) => text.is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(map) => map.is_empty(),
            },
        }
    }
}

impl From<Value> for ProviderOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Self::String(text),
            Value::Array(items) => Self::Sequence(items),
            Value::Object(map) => Self::Mapping(map),
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ProviderOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accessor(file) => write!(f, "{file}"),
            Self::String(text) => f.write_str(text.as_str()),
            Self::Sequence(items) => write!(f, "{}", Value::Array(items.clone())),
            Self::Mapping(map) => write!(f, "{}", Value::Object(map.clone())),
            Self::Other(value) => f.write_str(render_value(value).as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("unrecognized provider output format: {rendered}")]
    UnrecognizedOutputFormat { rendered: String },
}

/// Resolves the single result URL carried by a provider output.
///
/// Rules are tried in a fixed order and the first that applies wins:
/// accessor, first element of a non-empty sequence, plain string, mapping
/// (`url`, then `output` as string or sequence, then the first `http(s)://`
/// value), and finally the textual rendering when it starts with `http`.
pub fn normalize_output(output: &ProviderOutput) -> Result<String, NormalizeError> {
    match output {
        ProviderOutput::Accessor(file) => match file.url() {
            Ok(url) => Ok(String::from(url)),
            Err(error) => {
                debug!(%error, raw = %file, "provider file URL accessor failed");
                from_rendered(output)
            }
        },
        ProviderOutput::Sequence(items) => match items.first() {
            Some(first) => string_or_unrecognized(first, output),
            None => from_rendered(output),
        },
        ProviderOutput::String(url) => Ok(url.clone()),
        ProviderOutput::Mapping(map) => from_mapping(map, output),
        ProviderOutput::Other(_) => from_rendered(output),
    }
}

fn from_mapping(map: &Map<String, Value>, output: &ProviderOutput) -> Result<String, NormalizeError> {
    if let Some(url) = map.get("url") {
        return string_or_unrecognized(url, output);
    }
    match map.get("output") {
        Some(Value::String(url)) => return Ok(url.clone()),
        Some(Value::Array(items)) if !items.is_empty() => {
            return string_or_unrecognized(&items[0], output);
        }
        _ => {}
    }
    map.values()
        .filter_map(Value::as_str)
        .find(|value| value.starts_with("http://") || value.starts_with("https://"))
        .map(str::to_string)
        .ok_or_else(|| unrecognized(output))
}

fn from_rendered(output: &ProviderOutput) -> Result<String, NormalizeError> {
    let rendered = output.to_string();
    if rendered.starts_with("http") {
        Ok(rendered)
    } else {
        Err(NormalizeError::UnrecognizedOutputFormat { rendered })
    }
}

fn string_or_unrecognized(value: &Value, output: &ProviderOutput) -> Result<String, NormalizeError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| unrecognized(output))
}

fn unrecognized(output: &ProviderOutput) -> NormalizeError {
    NormalizeError::UnrecognizedOutputFormat {
        rendered: output.to_string(),
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
