use super::{LoadSignal, LoadWaiter, PageEngine, PageView, ScriptResult};
use crate::{Error, Result};
use image::RgbImage;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

type ViewId = u64;
type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Open(Reply<ViewId>),
    SetViewport(ViewId, u32, u32, Reply<()>),
    SetZoom(ViewId, f64, Reply<()>),
    HideScrollbars(ViewId, Reply<()>),
    Navigate(ViewId, String, LoadSignal, Reply<()>),
    ContentSize(ViewId, Reply<(u32, u32)>),
    Evaluate(ViewId, String, Reply<ScriptResult>),
    RenderFrame(ViewId, Reply<RgbImage>),
    Release(ViewId, Reply<()>),

    Shutdown(Reply<()>),
}

/// Async handle to a rendering engine running on a dedicated thread.
///
/// The thread owns the engine and every view it opens; sessions talk to it by
/// sending commands and awaiting the reply, so an engine that must stay on
/// one thread can still serve any number of concurrent async sessions.
#[derive(Clone)]
pub struct EngineHost {
    cmd_tx: Sender<Command>,
}

/// A view opened on the host, exclusively owned by one render session.
///
/// Dropping a view without calling [`View::release`] still releases it on
/// the engine thread, so a session that is aborted or unwinds cannot leak it.
pub struct View {
    id: ViewId,
    cmd_tx: Sender<Command>,
    released: bool,
}

fn with_view<V, T>(
    views: &mut HashMap<ViewId, V>,
    id: ViewId,
    f: impl FnOnce(&mut V) -> Result<T>,
) -> Result<T> {
    match views.get_mut(&id) {
        Some(view) => f(view),
        None => Err(Error::Engine(format!("unknown view {}", id))),
    }
}

impl EngineHost {
    /// Spawn the engine thread. `factory` runs on that thread, so the engine
    /// it builds never crosses threads.
    pub async fn spawn<E, F>(factory: F) -> Result<Self>
    where
        E: PageEngine + 'static,
        F: FnOnce() -> Result<E> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::Builder::new()
            .name("url2img-engine".into())
            .spawn(move || {
                let mut engine = match factory() {
                    Ok(e) => e,
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));

                let mut views: HashMap<ViewId, E::View> = HashMap::new();
                let mut next_id: ViewId = 0;

                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        Command::Open(resp) => {
                            let res = engine.create_view().map(|view| {
                                next_id += 1;
                                views.insert(next_id, view);
                                next_id
                            });
                            let _ = resp.send(res);
                        }
                        Command::SetViewport(id, w, h, resp) => {
                            let _ = resp.send(with_view(&mut views, id, |v| v.set_viewport(w, h)));
                        }
                        Command::SetZoom(id, zoom, resp) => {
                            let _ = resp.send(with_view(&mut views, id, |v| v.set_zoom(zoom)));
                        }
                        Command::HideScrollbars(id, resp) => {
                            let _ = resp.send(with_view(&mut views, id, |v| v.hide_scrollbars()));
                        }
                        Command::Navigate(id, url, signal, resp) => {
                            let _ = resp.send(with_view(&mut views, id, |v| v.navigate(&url, signal)));
                        }
                        Command::ContentSize(id, resp) => {
                            let _ = resp.send(with_view(&mut views, id, |v| v.content_size()));
                        }
                        Command::Evaluate(id, script, resp) => {
                            let _ = resp.send(with_view(&mut views, id, |v| v.evaluate_script(&script)));
                        }
                        Command::RenderFrame(id, resp) => {
                            let _ = resp.send(with_view(&mut views, id, |v| v.render_frame()));
                        }
                        Command::Release(id, resp) => {
                            let res = match views.remove(&id) {
                                Some(view) => view.release(),
                                None => Err(Error::Engine(format!("unknown view {}", id))),
                            };
                            let _ = resp.send(res);
                        }
                        Command::Shutdown(resp) => {
                            let res = close_all(&mut engine, &mut views);
                            let _ = resp.send(res);
                            return;
                        }
                    }
                }

                // Every handle was dropped without an explicit shutdown
                if let Err(e) = close_all(&mut engine, &mut views) {
                    warn!("engine shutdown failed: {}", e);
                }
            })
            .map_err(|e| Error::Engine(format!("Failed to spawn engine thread: {}", e)))?;

        let init_res = init_rx
            .await
            .map_err(|e| Error::Engine(format!("Engine init canceled: {}", e)))?;
        init_res?;

        Ok(Self { cmd_tx })
    }

    /// Open a new view for one render session
    pub async fn open_view(&self) -> Result<View> {
        let id = request(&self.cmd_tx, "Open view", Command::Open).await?;
        Ok(View {
            id,
            cmd_tx: self.cmd_tx.clone(),
            released: false,
        })
    }

    /// Release any views still open and stop the engine thread.
    pub async fn shutdown(self) -> Result<()> {
        request(&self.cmd_tx, "Shutdown", Command::Shutdown).await
    }
}

fn close_all<E: PageEngine>(engine: &mut E, views: &mut HashMap<ViewId, E::View>) -> Result<()> {
    for (id, view) in views.drain() {
        debug!("releasing view {} at shutdown", id);
        if let Err(e) = view.release() {
            warn!("failed to release view {}: {}", id, e);
        }
    }
    engine.shutdown()
}

async fn request<T>(
    cmd_tx: &Sender<Command>,
    what: &str,
    build: impl FnOnce(Reply<T>) -> Command,
) -> Result<T> {
    let (tx, rx) = oneshot::channel();
    cmd_tx
        .send(build(tx))
        .map_err(|_| Error::Engine(format!("{}: engine thread has stopped", what)))?;
    rx.await
        .map_err(|e| Error::Engine(format!("{} canceled: {}", what, e)))?
}

impl View {
    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        request(&self.cmd_tx, "SetViewport", |tx| {
            Command::SetViewport(self.id, width, height, tx)
        })
        .await
    }

    pub async fn set_zoom(&self, zoom: f64) -> Result<()> {
        request(&self.cmd_tx, "SetZoom", |tx| Command::SetZoom(self.id, zoom, tx)).await
    }

    pub async fn hide_scrollbars(&self) -> Result<()> {
        request(&self.cmd_tx, "HideScrollbars", |tx| Command::HideScrollbars(self.id, tx)).await
    }

    /// Start navigation; the returned waiter resolves on load-completion.
    pub async fn navigate(&self, url: &str) -> Result<LoadWaiter> {
        let (signal, waiter) = LoadSignal::channel();
        request(&self.cmd_tx, "Navigate", |tx| {
            Command::Navigate(self.id, url.to_string(), signal, tx)
        })
        .await?;
        Ok(waiter)
    }

    pub async fn content_size(&self) -> Result<(u32, u32)> {
        request(&self.cmd_tx, "ContentSize", |tx| Command::ContentSize(self.id, tx)).await
    }

    pub async fn evaluate(&self, script: &str) -> Result<ScriptResult> {
        request(&self.cmd_tx, "Evaluate", |tx| {
            Command::Evaluate(self.id, script.to_string(), tx)
        })
        .await
    }

    pub async fn render_frame(&self) -> Result<RgbImage> {
        request(&self.cmd_tx, "RenderFrame", |tx| Command::RenderFrame(self.id, tx)).await
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        request(&self.cmd_tx, "Release", |tx| Command::Release(self.id, tx)).await
    }
}

impl Drop for View {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        debug!("view {} dropped without release", self.id);
        // Nobody waits for the reply; a stopped engine already released it
        let (tx, _rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Release(self.id, tx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingEngine {
        open: Arc<AtomicUsize>,
    }

    struct BlankView {
        size: (u32, u32),
        open: Arc<AtomicUsize>,
    }

    impl PageEngine for CountingEngine {
        type View = BlankView;

        fn create_view(&mut self) -> Result<BlankView> {
            self.open.fetch_add(1, Ordering::SeqCst);
            Ok(BlankView { size: (1, 1), open: self.open.clone() })
        }
    }

    impl PageView for BlankView {
        fn set_viewport(&mut self, width: u32, height: u32) -> Result<()> {
            self.size = (width, height);
            Ok(())
        }
        fn set_zoom(&mut self, _zoom: f64) -> Result<()> {
            Ok(())
        }
        fn hide_scrollbars(&mut self) -> Result<()> {
            Ok(())
        }
        fn navigate(&mut self, _url: &str, on_load: LoadSignal) -> Result<()> {
            on_load.fire(true);
            Ok(())
        }
        fn content_size(&mut self) -> Result<(u32, u32)> {
            Ok(self.size)
        }
        fn evaluate_script(&mut self, script: &str) -> Result<ScriptResult> {
            Ok(ScriptResult { value: script.len().to_string(), is_error: false })
        }
        fn render_frame(&mut self) -> Result<RgbImage> {
            Ok(RgbImage::new(self.size.0, self.size.1))
        }
        fn release(self) -> Result<()> {
            self.open.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn views_round_trip_through_the_engine_thread() {
        let open = Arc::new(AtomicUsize::new(0));
        let counter = open.clone();
        let host = EngineHost::spawn(move || Ok(CountingEngine { open: counter }))
            .await
            .unwrap();

        let view = host.open_view().await.unwrap();
        view.set_viewport(40, 30).await.unwrap();
        assert_eq!(view.content_size().await.unwrap(), (40, 30));
        let loaded = view.navigate("about:blank").await.unwrap();
        assert_eq!(loaded.await.ok(), Some(true));
        let frame = view.render_frame().await.unwrap();
        assert_eq!(frame.dimensions(), (40, 30));
        assert_eq!(view.evaluate("1+1").await.unwrap().value, "3");
        assert_eq!(open.load(Ordering::SeqCst), 1);

        view.release().await.unwrap();
        assert_eq!(open.load(Ordering::SeqCst), 0);
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_releases_leftover_views() {
        let open = Arc::new(AtomicUsize::new(0));
        let counter = open.clone();
        let host = EngineHost::spawn(move || Ok(CountingEngine { open: counter }))
            .await
            .unwrap();
        let a = host.open_view().await.unwrap();
        let _b = host.open_view().await.unwrap();
        assert_eq!(open.load(Ordering::SeqCst), 2);

        host.clone().shutdown().await.unwrap();
        assert_eq!(open.load(Ordering::SeqCst), 0);
        assert!(matches!(a.content_size().await, Err(Error::Engine(_))));
    }

    #[tokio::test]
    async fn dropped_view_is_released() {
        let open = Arc::new(AtomicUsize::new(0));
        let counter = open.clone();
        let host = EngineHost::spawn(move || Ok(CountingEngine { open: counter }))
            .await
            .unwrap();

        let view = host.open_view().await.unwrap();
        let kept = host.open_view().await.unwrap();
        assert_eq!(open.load(Ordering::SeqCst), 2);
        drop(view);

        // Commands are handled in order, so this round trip follows the release
        kept.content_size().await.unwrap();
        assert_eq!(open.load(Ordering::SeqCst), 1);

        kept.release().await.unwrap();
        assert_eq!(open.load(Ordering::SeqCst), 0);
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn factory_failure_is_reported() {
        let res = EngineHost::spawn(|| -> Result<CountingEngine> {
            Err(Error::Config("no browser".into()))
        })
        .await;
        assert!(matches!(res, Err(Error::Config(_))));
    }
}
