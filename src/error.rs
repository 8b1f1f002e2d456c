//! Error types for the render pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding, rendering or encoding a request
#[derive(Error, Debug)]
pub enum Error {
    /// The inbound request could not be decoded into `Params`
    #[error("Malformed request: {0}")]
    Decode(String),

    /// The rendering engine failed or went away
    #[error("Engine failure: {0}")]
    Engine(String),

    /// Failed to capture or rasterize the page
    #[error("Rendering failed: {0}")]
    Render(String),

    /// Failed to evaluate JavaScript in the page
    #[error("Script execution failed: {0}")]
    Script(String),

    /// The image codec rejected the bitmap or its parameters
    #[error("Encoding failed: {0}")]
    Encode(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Encode(err.to_string())
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Cdp(err.to_string())
    }
}
