//! Scripted in-process engine for pipeline tests

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url2img::engine::{EngineHost, LoadSignal, PageEngine, PageView, ScriptResult};
use url2img::{Error, Result};

pub const PAGE_COLOR: Rgb<u8> = Rgb([40, 90, 160]);
pub const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// How a scripted page reacts to navigation
#[derive(Debug, Clone, Copy)]
pub enum Load {
    /// Fire load-completion with `ok` after `after`
    Fire { ok: bool, after: Duration },
    /// Never fire; the signal is kept alive forever
    Never,
    /// Drop the signal without firing
    Drop,
}

#[derive(Debug, Clone, Copy)]
pub struct PageScript {
    /// Document size in CSS pixels
    pub content: (u32, u32),
    pub load: Load,
    /// Frame capture reports an engine error
    pub fail_capture: bool,
    /// Value the `offsetHeight` script yields instead of the content height
    pub document_height: Option<&'static str>,
}

impl PageScript {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            content: (width, height),
            load: Load::Fire {
                ok: true,
                after: Duration::from_millis(5),
            },
            fail_capture: false,
            document_height: None,
        }
    }

    pub fn with_load(mut self, load: Load) -> Self {
        self.load = load;
        self
    }

    pub fn failing_capture(mut self) -> Self {
        self.fail_capture = true;
        self
    }

    pub fn with_document_height(mut self, value: &'static str) -> Self {
        self.document_height = Some(value);
        self
    }
}

/// What the engine observed, shared with the test
#[derive(Debug, Default)]
pub struct Journal {
    pub opened: usize,
    pub released: usize,
    pub navigations: Vec<String>,
    /// Every viewport change in order, tagged with the view
    pub viewports: Vec<(u64, u32, u32)>,
    pub zooms: Vec<f64>,
    pub scrollbars_hidden: usize,
    pub frames: Vec<(u32, u32)>,
}

impl Journal {
    pub fn open_views(&self) -> usize {
        self.opened - self.released
    }
}

pub struct ScriptedEngine {
    pages: HashMap<String, PageScript>,
    journal: Arc<Mutex<Journal>>,
    parked: Arc<Mutex<Vec<LoadSignal>>>,
    next: u64,
}

pub struct ScriptedView {
    id: u64,
    pages: HashMap<String, PageScript>,
    journal: Arc<Mutex<Journal>>,
    parked: Arc<Mutex<Vec<LoadSignal>>>,
    viewport: (u32, u32),
    current: Option<PageScript>,
}

impl PageEngine for ScriptedEngine {
    type View = ScriptedView;

    fn create_view(&mut self) -> Result<ScriptedView> {
        self.next += 1;
        self.journal.lock().unwrap().opened += 1;
        Ok(ScriptedView {
            id: self.next,
            pages: self.pages.clone(),
            journal: self.journal.clone(),
            parked: self.parked.clone(),
            viewport: (800, 600),
            current: None,
        })
    }
}

impl PageView for ScriptedView {
    fn set_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        self.viewport = (width, height);
        self.journal
            .lock()
            .unwrap()
            .viewports
            .push((self.id, width, height));
        Ok(())
    }

    fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        self.journal.lock().unwrap().zooms.push(zoom);
        Ok(())
    }

    fn hide_scrollbars(&mut self) -> Result<()> {
        self.journal.lock().unwrap().scrollbars_hidden += 1;
        Ok(())
    }

    fn navigate(&mut self, url: &str, on_load: LoadSignal) -> Result<()> {
        self.journal.lock().unwrap().navigations.push(url.to_string());
        // Unknown URLs behave like an engine error page: small, but loaded
        let page = self.pages.get(url).copied().unwrap_or(
            PageScript::new(200, 100).with_load(Load::Fire {
                ok: false,
                after: Duration::from_millis(1),
            }),
        );
        self.current = Some(page);
        match page.load {
            Load::Fire { ok, after } => {
                std::thread::spawn(move || {
                    std::thread::sleep(after);
                    on_load.fire(ok);
                });
            }
            Load::Never => self.parked.lock().unwrap().push(on_load),
            Load::Drop => drop(on_load),
        }
        Ok(())
    }

    fn content_size(&mut self) -> Result<(u32, u32)> {
        let page = self
            .current
            .ok_or_else(|| Error::Render("nothing loaded".into()))?;
        Ok((page.content.0.max(self.viewport.0), page.content.1))
    }

    fn evaluate_script(&mut self, script: &str) -> Result<ScriptResult> {
        let page = self
            .current
            .ok_or_else(|| Error::Script("nothing loaded".into()))?;
        let value = if script.contains("offsetHeight") {
            match page.document_height {
                Some(v) => v.to_string(),
                None => page.content.1.to_string(),
            }
        } else {
            "null".to_string()
        };
        Ok(ScriptResult {
            value,
            is_error: false,
        })
    }

    fn render_frame(&mut self) -> Result<RgbImage> {
        if self.current.is_some_and(|p| p.fail_capture) {
            return Err(Error::Render("compositor lost".into()));
        }
        let (w, h) = self.viewport;
        let content = self.current.map(|p| p.content).unwrap_or((0, 0));
        self.journal.lock().unwrap().frames.push((w, h));
        Ok(RgbImage::from_fn(w, h, |x, y| {
            if x < content.0 && y < content.1 {
                PAGE_COLOR
            } else {
                BACKGROUND
            }
        }))
    }

    fn release(self) -> Result<()> {
        self.journal.lock().unwrap().released += 1;
        Ok(())
    }
}

/// Start a host serving `pages`, returning it with the shared journal.
pub async fn scripted_host(pages: &[(&str, PageScript)]) -> (EngineHost, Arc<Mutex<Journal>>) {
    let journal = Arc::new(Mutex::new(Journal::default()));
    let pages: HashMap<String, PageScript> = pages
        .iter()
        .map(|(url, page)| (url.to_string(), *page))
        .collect();
    let shared = journal.clone();
    let host = EngineHost::spawn(move || {
        Ok(ScriptedEngine {
            pages,
            journal: shared,
            parked: Arc::new(Mutex::new(Vec::new())),
            next: 0,
        })
    })
    .await
    .expect("scripted engine starts");
    (host, journal)
}

/// Wait until the journal shows no open views, or give up after `timeout`.
pub async fn views_drained(journal: &Arc<Mutex<Journal>>, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if journal.lock().unwrap().open_views() == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

pub fn decode_result(hex_data: &str) -> image::DynamicImage {
    let bytes = hex::decode(hex_data).expect("result is hex");
    image::load_from_memory(&bytes).expect("result decodes")
}
