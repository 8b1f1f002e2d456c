//! Page render driver: one render session from navigation to published result

use crate::engine::{EngineHost, View};
use crate::params::{Params, MAX_DIMENSION};
use crate::store::ResultStore;
use crate::{encoder, Error, Result};
use image::{imageops, Rgb, RgbImage};
use log::{debug, info, warn};
use std::time::Duration;

/// Script whose value becomes the capture height of a full-page render
const DOCUMENT_HEIGHT_SCRIPT: &str = "document.body ? document.body.offsetHeight : 0";

/// Background for any part of the output the engine frame does not cover
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Pipeline position of a render session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Loading,
    Delaying,
    Resizing,
    Capturing,
    Encoding,
    Completed,
}

/// Runs render sessions against an engine host and publishes their results.
#[derive(Clone)]
pub struct RenderDriver {
    host: EngineHost,
    store: ResultStore,
}

impl RenderDriver {
    pub fn new(host: EngineHost, store: ResultStore) -> Self {
        Self { host, store }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Render `params` and publish the hex-encoded image under `params.id`.
    ///
    /// Only a successfully encoded (possibly empty) image is published. If the
    /// engine fails mid-session or never reports load-completion, nothing is
    /// written for the id. The view is released in every case where the
    /// session ends.
    pub async fn run(&self, params: Params) {
        if let Err(e) = params.validate() {
            warn!("session {}: rejected before opening a view: {}", params.id, e);
            return;
        }
        let view = match self.host.open_view().await {
            Ok(v) => v,
            Err(e) => {
                warn!("session {}: could not open a view: {}", params.id, e);
                return;
            }
        };

        let mut session = RenderSession::new(view, params);
        match session.drive().await {
            Ok(encoded) => {
                let len = encoded.len();
                self.store.set(session.params.id.clone(), hex::encode(encoded));
                session.advance(SessionState::Completed);
                info!(
                    "session {}: published {} bytes of {}",
                    session.params.id, len, session.params.format
                );
            }
            Err(e) => warn!(
                "session {}: ended in {:?} without a result: {}",
                session.params.id, session.state, e
            ),
        }
        session.release().await;
    }
}

/// State for one in-flight request. Owns its view exclusively.
struct RenderSession {
    view: Option<View>,
    params: Params,
    state: SessionState,
}

impl RenderSession {
    fn new(view: View, params: Params) -> Self {
        Self {
            view: Some(view),
            params,
            state: SessionState::Created,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug!("session {}: {:?} -> {:?}", self.params.id, self.state, next);
        self.state = next;
    }

    fn view(&self) -> Result<&View> {
        self.view
            .as_ref()
            .ok_or_else(|| Error::Engine("view already released".into()))
    }

    /// Walk the pipeline up to the encoded bytes.
    async fn drive(&mut self) -> Result<Vec<u8>> {
        let width = self.params.width;
        let mut height = self.params.height;

        // Height tracks width until capture; the real output height is applied later
        let view = self.view()?;
        view.set_viewport(width, width).await?;
        view.set_zoom(self.params.zoom).await?;
        view.hide_scrollbars().await?;
        let loaded = view.navigate(&self.params.url).await?;
        self.advance(SessionState::Loading);

        let ok = loaded
            .await
            .map_err(|_| Error::Engine("engine dropped the load-completion signal".into()))?;
        if !ok {
            debug!(
                "session {}: engine reported a failed load, capturing what it shows",
                self.params.id
            );
        }

        if self.params.delay > 0 {
            self.advance(SessionState::Delaying);
            tokio::time::sleep(Duration::from_millis(self.params.delay)).await;
        }

        if self.params.full {
            self.advance(SessionState::Resizing);
            height = self.resize_to_content().await?;
        }

        self.advance(SessionState::Capturing);
        let frame = self.view()?.render_frame().await?;
        let bitmap = paint(&frame, width, height);

        self.advance(SessionState::Encoding);
        Ok(self.encode(&bitmap))
    }

    /// Grow the viewport to the whole document and return the height to capture.
    ///
    /// Both the grown viewport and the returned height stay within
    /// `MAX_DIMENSION`; taller documents are cut off at the cap.
    async fn resize_to_content(&self) -> Result<u32> {
        let view = self.view()?;
        let (content_w, content_h) = view.content_size().await?;
        let content_w = clamp_dimension(content_w);
        let content_h = clamp_dimension(content_h);
        view.set_viewport(content_w, content_h).await?;

        // Layout may change after the resize, so re-read the live height
        let measured = view.evaluate(DOCUMENT_HEIGHT_SCRIPT).await?;
        let height = parse_dimension(&measured.value).unwrap_or(0);
        if height == 0 {
            debug!(
                "session {}: document height {:?} unusable, using content height {}",
                self.params.id, measured.value, content_h
            );
            return Ok(content_h);
        }
        if height > MAX_DIMENSION {
            debug!(
                "session {}: document height {} cut to {}",
                self.params.id, height, MAX_DIMENSION
            );
        }
        Ok(clamp_dimension(height))
    }

    /// Any encode failure degrades to an empty result, like an unknown format.
    fn encode(&self, bitmap: &RgbImage) -> Vec<u8> {
        let res = encoder::to_intermediate(bitmap)
            .and_then(|png| encoder::from_intermediate(&png))
            .and_then(|img| encoder::encode(&img, &self.params.format, self.params.quality));
        match res {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("session {}: {}", self.params.id, e);
                Vec::new()
            }
        }
    }

    async fn release(&mut self) {
        if let Some(view) = self.view.take() {
            if let Err(e) = view.release().await {
                warn!("session {}: failed to release view: {}", self.params.id, e);
            }
        }
    }
}

/// Paint the engine frame at the origin of a `width` x `height` RGB canvas.
///
/// The frame is never scaled: parts outside the canvas are cropped and
/// uncovered canvas keeps the background colour.
pub fn paint(frame: &RgbImage, width: u32, height: u32) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);
    imageops::replace(&mut canvas, frame, 0, 0);
    canvas
}

fn clamp_dimension(v: u32) -> u32 {
    v.clamp(1, MAX_DIMENSION)
}

/// Script values arrive as text; accept integers and JS floats like "812.5".
fn parse_dimension(value: &str) -> Option<u32> {
    let v: f64 = value.trim().trim_matches('"').parse().ok()?;
    if v.is_finite() && v > 0.0 {
        Some(v.round() as u32)
    } else {
        None
    }
}
