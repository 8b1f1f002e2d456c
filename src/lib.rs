//! url2img
//!
//! Renders web pages into PNG, JPEG or WebP images through a headless
//! browser and publishes the hex-encoded bytes under a caller-chosen id.
//!
//! # Pipeline
//!
//! - [`Dispatcher`] decodes JSON requests into [`Params`] and schedules one
//!   render session per request on the current tokio runtime.
//! - [`RenderDriver`] walks a session through navigation, the optional
//!   post-load delay, optional full-page resizing, capture and encoding.
//! - [`encoder`] turns the captured bitmap into the requested format.
//! - [`ResultStore`] holds the results for the transport to read.
//!
//! The browser itself sits behind the [`engine::PageEngine`] trait and runs on
//! a dedicated thread owned by an [`EngineHost`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use url2img::{Dispatcher, RendererConfig, ResultStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let host = url2img::cdp::launch(RendererConfig::default()).await?;
//! let dispatcher = Dispatcher::new(host, ResultStore::new());
//!
//! dispatcher.submit(r#"{"url":"https://example.com","id":"ex","format":"png"}"#);
//! let hex = dispatcher
//!     .store()
//!     .wait("ex", Duration::from_millis(50), Duration::from_secs(30))
//!     .await;
//! println!("got {} hex chars", hex.map(|h| h.len()).unwrap_or(0));
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

pub mod dispatcher;
pub mod driver;
pub mod encoder;
pub mod engine;
pub mod params;
pub mod store;

// Chrome backend
#[cfg(feature = "cdp")]
pub mod cdp;

pub use dispatcher::Dispatcher;
pub use driver::{RenderDriver, SessionState};
pub use engine::EngineHost;
pub use params::{Format, Params};
pub use store::ResultStore;

/// Configuration for the rendering engine
///
/// Per-request settings (viewport, zoom, format) travel in [`Params`]; this
/// only covers how the browser process itself is launched.
///
/// # Examples
///
/// ```
/// let cfg = url2img::RendererConfig::default();
/// assert!(cfg.headless);
/// assert!(cfg.enable_javascript);
/// ```
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// User agent override; the browser's own when `None`
    pub user_agent: Option<String>,
    /// Browser window size
    pub window: Viewport,
    pub headless: bool,
    /// Keep the browser's process sandbox enabled
    pub sandbox: bool,
    /// Browser executable; autodetected when `None`
    pub browser_path: Option<PathBuf>,
    /// Directory for the browser's on-disk caches
    pub storage_dir: PathBuf,
    /// How long the engine waits on a navigation before giving up on it
    pub navigation_timeout_ms: u64,
    pub enable_javascript: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            window: Viewport::default(),
            headless: true,
            sandbox: true,
            browser_path: None,
            storage_dir: std::env::temp_dir(),
            navigation_timeout_ms: 30000,
            enable_javascript: true,
        }
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RendererConfig::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert!(config.sandbox);
        assert!(config.user_agent.is_none());
        assert_eq!(config.storage_dir, std::env::temp_dir());
    }
}
