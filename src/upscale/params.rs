use thiserror::Error;

pub const DEFAULT_SCALE: &str = "4";
pub const DEFAULT_FACE_ENHANCE: &str = "true";
pub const MIN_SCALE: u8 = 1;
pub const MAX_SCALE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpscaleParameters {
    pub scale: u8,
    pub face_enhance: bool,
}

impl UpscaleParameters {
    /// Absent fields take the form defaults (`"4"` and `"true"`).
    pub fn parse(scale: Option<&str>, face_enhance: Option<&str>) -> Result<Self, ParamError> {
        Ok(Self {
            scale: parse_scale(scale.unwrap_or(DEFAULT_SCALE))?,
            face_enhance: parse_face_enhance(face_enhance.unwrap_or(DEFAULT_FACE_ENHANCE)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("could not convert scale '{0}' to a number")]
    InvalidScale(String),
}

/// Parses a real number, truncates toward zero, then clamps into `[1, 10]`.
pub fn parse_scale(raw: &str) -> Result<u8, ParamError> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| ParamError::InvalidScale(raw.to_string()))?;
    if !value.is_finite() {
        return Err(ParamError::InvalidScale(raw.to_string()));
    }
    let clamped = value.trunc().clamp(f64::from(MIN_SCALE), f64::from(MAX_SCALE));
    Ok(clamped as u8)
}

pub fn parse_face_enhance(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("true")
}
