//! Inbound request decoding

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Largest accepted width or height, in pixels. Chrome refuses to composite
/// surfaces beyond this on either axis.
pub const MAX_DIMENSION: u32 = 16_384;

/// One render request, decoded from the transport's JSON record.
///
/// Fields other than `url` and `id` fall back to the defaults below when the
/// record omits them. `format` is kept as the caller sent it: an unknown
/// format is not a decode error, it produces an empty result downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub url: String,
    pub id: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_quality")]
    pub quality: i32,
    /// Milliseconds to wait after load-completion before capturing
    #[serde(default)]
    pub delay: u64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    /// Capture the whole document height instead of `height`
    #[serde(default)]
    pub full: bool,
}

fn default_format() -> String {
    "png".to_string()
}

fn default_quality() -> i32 {
    80
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_zoom() -> f64 {
    1.0
}

impl Params {
    /// Build params for `url` with every optional field at its default.
    pub fn new(url: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: id.into(),
            format: default_format(),
            quality: default_quality(),
            delay: 0,
            width: default_width(),
            height: default_height(),
            zoom: default_zoom(),
            full: false,
        }
    }

    /// Decode a raw JSON request and check the field constraints.
    pub fn decode(raw: &str) -> Result<Self> {
        let params: Params = serde_json::from_str(raw)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Decode("url must not be empty".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::Decode(format!(
                "viewport must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(Error::Decode(format!(
                "viewport {}x{} exceeds {} pixels per side",
                self.width, self.height, MAX_DIMENSION
            )));
        }
        if !(self.zoom.is_finite() && self.zoom > 0.0) {
            return Err(Error::Decode(format!("zoom must be positive, got {}", self.zoom)));
        }
        Ok(())
    }

    /// The requested output format, if it is one the encoder knows.
    pub fn output_format(&self) -> Option<Format> {
        Format::parse(&self.format)
    }
}

/// Output formats understood by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Png,
    Jpeg,
    WebP,
}

impl Format {
    /// Case-insensitive lookup; `jpg` and `jpeg` are the same format.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PNG" => Some(Format::Png),
            "JPG" | "JPEG" => Some(Format::Jpeg),
            "WEBP" => Some(Format::WebP),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Png => "png",
            Format::Jpeg => "jpg",
            Format::WebP => "webp",
        }
    }
}
