//! Chrome DevTools Protocol engine adapter (uses the `headless_chrome` crate)

use crate::engine::{EngineHost, LoadSignal, PageEngine, PageView, ScriptResult};
use crate::{Error, RendererConfig, Result};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::{Browser, LaunchOptions};
use image::{ImageFormat, RgbImage};
use log::{debug, warn};
use std::ffi::OsStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CONTENT_SIZE_SCRIPT: &str = r#"(function() {
    const d = document.documentElement;
    const b = document.body;
    const w = Math.max(d ? d.scrollWidth : 0, b ? b.scrollWidth : 0);
    const h = Math.max(d ? d.scrollHeight : 0, b ? b.scrollHeight : 0);
    return JSON.stringify([w, h]);
})()"#;

/// Browser features a capture never needs: GPU paths, WebGL, plugins,
/// notifications and pages opening windows of their own.
pub const RESTRICTED_FEATURE_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-gpu-compositing",
    "--disable-accelerated-2d-canvas",
    "--disable-3d-apis",
    "--disable-plugins",
    "--disable-notifications",
    "--deny-permission-prompts",
    "--block-new-web-contents",
    "--mute-audio",
];

/// `headless_chrome` defaults that would undo the restrictions above
const IGNORED_DEFAULT_ARGS: &[&str] = &["--disable-popup-blocking"];

/// Runs before any page script in every document. Takes away what the
/// launch switches cannot: storage, WebAudio, clipboard access and
/// scripted window open/close.
const RESTRICTIONS_SCRIPT: &str = r#"(function() {
    function deny(target, name) {
        try {
            Object.defineProperty(target, name, { get: function() { return undefined; }, configurable: false });
        } catch (e) {}
    }
    ['localStorage', 'sessionStorage', 'indexedDB', 'openDatabase', 'caches',
     'AudioContext', 'webkitAudioContext', 'OfflineAudioContext', 'Notification'
    ].forEach(function(name) { deny(window, name); });
    deny(navigator, 'clipboard');
    deny(navigator, 'serviceWorker');
    window.open = function() { return null; };
    window.close = function() {};
})();"#;

/// Command line switches for a capture browser
pub fn launch_args(config: &RendererConfig) -> Vec<String> {
    let mut args = vec![
        format!("--disk-cache-dir={}", config.storage_dir.display()),
        "--hide-scrollbars".to_string(),
    ];
    args.extend(RESTRICTED_FEATURE_ARGS.iter().map(|a| a.to_string()));
    if !config.enable_javascript {
        args.push("--blink-settings=scriptEnabled=false".to_string());
    }
    args
}

/// Launch headless Chrome on a dedicated engine thread.
pub async fn launch(config: RendererConfig) -> Result<EngineHost> {
    EngineHost::spawn(move || CdpEngine::new(config)).await
}

/// Headless Chrome instance; each view is one tab.
pub struct CdpEngine {
    browser: Browser,
    config: RendererConfig,
}

/// A single Chrome tab driven through CDP
pub struct CdpView {
    tab: Arc<Tab>,
    viewport: (u32, u32),
    zoom: f64,
}

impl CdpEngine {
    pub fn new(config: RendererConfig) -> Result<Self> {
        let args = launch_args(&config);
        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(config.sandbox)
            .path(config.browser_path.clone())
            .window_size(Some((config.window.width, config.window.height)))
            .args(args.iter().map(OsStr::new).collect())
            .ignore_default_args(IGNORED_DEFAULT_ARGS.iter().map(OsStr::new).collect())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::Engine(format!("Failed to launch browser: {}", e)))?;

        debug!("launched headless Chrome (window {}x{})", config.window.width, config.window.height);
        Ok(Self { browser, config })
    }
}

impl PageEngine for CdpEngine {
    type View = CdpView;

    fn create_view(&mut self) -> Result<CdpView> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::Engine(format!("Failed to create tab: {}", e)))?;

        tab.set_default_timeout(Duration::from_millis(self.config.navigation_timeout_ms));

        if let Some(ua) = &self.config.user_agent {
            tab.set_user_agent(ua, None, None)
                .map_err(|e| Error::Engine(format!("Failed to set user agent: {}", e)))?;
        }

        if self.config.enable_javascript {
            tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
                source: RESTRICTIONS_SCRIPT.to_string(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })?;
        } else {
            tab.call_method(Emulation::SetScriptExecutionDisabled { value: true })?;
        }

        Ok(CdpView {
            tab,
            viewport: (self.config.window.width, self.config.window.height),
            zoom: 1.0,
        })
    }
}

impl PageView for CdpView {
    fn set_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        self.tab.call_method(Emulation::SetDeviceMetricsOverride {
            width,
            height,
            device_scale_factor: 1.0,
            mobile: false,
            scale: None,
            screen_width: None,
            screen_height: None,
            position_x: None,
            position_y: None,
            dont_set_visible_size: None,
            screen_orientation: None,
            viewport: None,
            display_feature: None,
            device_posture: None,
        })?;
        self.viewport = (width, height);
        Ok(())
    }

    fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        self.zoom = zoom;
        Ok(())
    }

    fn hide_scrollbars(&mut self) -> Result<()> {
        self.tab
            .call_method(Emulation::SetScrollbarsHidden { hidden: true })?;
        Ok(())
    }

    fn navigate(&mut self, url: &str, on_load: LoadSignal) -> Result<()> {
        if (self.zoom - 1.0).abs() > f64::EPSILON {
            // CSS zoom has to be reapplied to every document the tab loads
            let source = format!(
                "(function(){{function z(){{document.documentElement.style.zoom='{}';}}\
                 if(document.readyState==='loading'){{document.addEventListener('DOMContentLoaded',z);}}else{{z();}}}})();",
                self.zoom
            );
            self.tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
                source,
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })?;
        }

        // Failed navigations still end in load-completion: Chrome shows its
        // error page and that is what gets captured.
        if let Err(e) = self.tab.navigate_to(url) {
            debug!("navigation to {} failed: {}", url, e);
            on_load.fire(false);
            return Ok(());
        }

        let tab = Arc::clone(&self.tab);
        let target = url.to_string();
        thread::Builder::new()
            .name("url2img-load".into())
            .spawn(move || {
                let ok = match tab.wait_until_navigated() {
                    Ok(_) => true,
                    Err(e) => {
                        debug!("waiting for {} failed: {}", target, e);
                        false
                    }
                };
                on_load.fire(ok);
            })
            .map_err(|e| Error::Engine(format!("Failed to spawn load waiter: {}", e)))?;
        Ok(())
    }

    fn content_size(&mut self) -> Result<(u32, u32)> {
        let result = self.evaluate_script(CONTENT_SIZE_SCRIPT)?;
        let dims: Vec<f64> = serde_json::from_str(&result.value)
            .map_err(|e| Error::Render(format!("Unexpected content size {:?}: {}", result.value, e)))?;
        match dims.as_slice() {
            [w, h] => Ok((w.max(0.0).round() as u32, h.max(0.0).round() as u32)),
            _ => Err(Error::Render(format!("Unexpected content size {:?}", result.value))),
        }
    }

    fn evaluate_script(&mut self, script: &str) -> Result<ScriptResult> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| Error::Script(format!("Evaluation failed: {}", e)))?;

        let value = match result.value {
            Some(serde_json::Value::String(s)) => s,
            Some(v) => v.to_string(),
            None => "null".to_string(),
        };

        Ok(ScriptResult {
            value,
            is_error: false,
        })
    }

    fn render_frame(&mut self) -> Result<RgbImage> {
        let (width, height) = self.viewport;
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f64,
            height: height as f64,
            scale: 1.0,
        };
        let png = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
            .map_err(|e| Error::Render(format!("Screenshot failed: {}", e)))?;

        let frame = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map_err(|e| Error::Render(format!("Undecodable screenshot: {}", e)))?;
        Ok(frame.to_rgb8())
    }

    fn release(self) -> Result<()> {
        if let Err(e) = self.tab.close(false) {
            warn!("Failed to close tab: {}", e);
        }
        Ok(())
    }
}
