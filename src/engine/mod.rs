//! Rendering engine collaborator interface
//!
//! The pipeline never talks to a browser directly. It drives anything that
//! implements [`PageEngine`] / [`PageView`] through an [`EngineHost`], which
//! pins the engine and all of its views to a single dedicated thread.

use crate::Result;
use image::RgbImage;
use tokio::sync::oneshot;

pub mod host;

pub use host::{EngineHost, View};

/// Result of JavaScript execution
///
/// `value` is the serialized result of the evaluation. Strings are returned
/// without surrounding quotes; everything else in its JSON form.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptResult {
    pub value: String,
    pub is_error: bool,
}

/// One-shot load-completion notification handed to [`PageView::navigate`].
///
/// Firing consumes the signal, so a view can report completion at most once
/// per navigation. Dropping it without firing tells the waiting session that
/// completion will never come.
#[derive(Debug)]
pub struct LoadSignal {
    tx: oneshot::Sender<bool>,
}

/// Receiving half of a [`LoadSignal`]
pub type LoadWaiter = oneshot::Receiver<bool>;

impl LoadSignal {
    pub fn channel() -> (LoadSignal, LoadWaiter) {
        let (tx, rx) = oneshot::channel();
        (LoadSignal { tx }, rx)
    }

    /// Report that the navigation's load phase finished. `ok` is the engine's
    /// own success flag; the pipeline proceeds either way.
    pub fn fire(self, ok: bool) {
        let _ = self.tx.send(ok);
    }
}

/// A rendering engine that can open independent page views.
///
/// Implementations are created and used on the engine host thread only, so
/// they need not be `Send`.
pub trait PageEngine {
    type View: PageView;

    fn create_view(&mut self) -> Result<Self::View>;

    /// Called once when the host shuts down, after every view was released
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One page/tab owned by exactly one render session.
pub trait PageView {
    /// Resize the viewport (and render surface) in CSS pixels
    fn set_viewport(&mut self, width: u32, height: u32) -> Result<()>;

    /// Page zoom factor applied to documents loaded after this call
    fn set_zoom(&mut self, zoom: f64) -> Result<()>;

    fn hide_scrollbars(&mut self) -> Result<()>;

    /// Start navigating to `url`. `on_load` fires when the load phase ends,
    /// whether or not the navigation succeeded at the HTTP level.
    fn navigate(&mut self, url: &str, on_load: LoadSignal) -> Result<()>;

    /// Total size of the current document's content
    fn content_size(&mut self) -> Result<(u32, u32)>;

    fn evaluate_script(&mut self, script: &str) -> Result<ScriptResult>;

    /// Rasterize the current viewport
    fn render_frame(&mut self) -> Result<RgbImage>;

    /// Close the view and free its engine resources
    fn release(self) -> Result<()>;
}
