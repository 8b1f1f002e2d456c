use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use url2img::{Dispatcher, EngineHost, Params, RendererConfig, ResultStore, Viewport};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "url2img", version, about = "Render web pages into images")]
struct Cli {
    #[command(flatten)]
    browser: BrowserArgs,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a single page and write the image to a file.
    Render(RenderArgs),
    /// Read JSON requests from stdin, one per line, and print results as they finish.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct BrowserArgs {
    /// Browser executable to launch (autodetected by default).
    #[arg(long, global = true)]
    browser_path: Option<PathBuf>,

    /// Disable the browser's process sandbox (needed when running as root).
    #[arg(long, global = true)]
    no_sandbox: bool,

    /// User agent override.
    #[arg(long, global = true)]
    user_agent: Option<String>,

    /// Give up on a navigation after this many milliseconds.
    #[arg(long, global = true, default_value_t = 30000)]
    navigation_timeout_ms: u64,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Page to render.
    #[arg(long)]
    url: String,

    /// Output path; prints the hex string to stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    /// png, jpeg/jpg or webp.
    #[arg(long, default_value = "png")]
    format: String,

    #[arg(long, default_value_t = 80)]
    quality: i32,

    /// Milliseconds to wait after the page has loaded.
    #[arg(long, default_value_t = 0)]
    delay: u64,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    #[arg(long, default_value_t = 1.0)]
    zoom: f64,

    /// Capture the full page height.
    #[arg(long)]
    full: bool,

    /// Seconds to wait for the result.
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Seconds to wait for each result before reporting it as missing.
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

impl BrowserArgs {
    fn config(&self) -> RendererConfig {
        RendererConfig {
            user_agent: self.user_agent.clone(),
            window: Viewport::default(),
            sandbox: !self.no_sandbox,
            browser_path: self.browser_path.clone(),
            navigation_timeout_ms: self.navigation_timeout_ms,
            ..Default::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let host = launch(cli.browser.config()).await?;
    let dispatcher = Dispatcher::new(host.clone(), ResultStore::new());

    let outcome = match cli.cmd {
        Command::Render(args) => render(&dispatcher, args).await,
        Command::Serve(args) => serve(&dispatcher, args).await,
    };

    if let Err(e) = host.shutdown().await {
        warn!("engine shutdown failed: {}", e);
    }
    outcome
}

#[cfg(feature = "cdp")]
async fn launch(config: RendererConfig) -> anyhow::Result<EngineHost> {
    url2img::cdp::launch(config)
        .await
        .context("failed to start headless Chrome")
}

#[cfg(not(feature = "cdp"))]
async fn launch(_config: RendererConfig) -> anyhow::Result<EngineHost> {
    bail!("url2img was built without a rendering engine; enable the `cdp` feature")
}

async fn render(dispatcher: &Dispatcher, args: RenderArgs) -> anyhow::Result<()> {
    let params = Params {
        url: args.url,
        id: "cli".to_string(),
        format: args.format,
        quality: args.quality,
        delay: args.delay,
        width: args.width,
        height: args.height,
        zoom: args.zoom,
        full: args.full,
    };
    params.validate()?;
    let id = params.id.clone();

    dispatcher.submit_params(params);
    let Some(hex_data) = dispatcher
        .store()
        .wait(&id, POLL_INTERVAL, Duration::from_secs(args.timeout))
        .await
    else {
        bail!("no result after {}s", args.timeout);
    };
    if hex_data.is_empty() {
        bail!("nothing was encoded; is the format one of png, jpeg, webp?");
    }

    match args.out {
        Some(path) => {
            let bytes = hex::decode(&hex_data).context("result is not valid hex")?;
            std::fs::write(&path, &bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => println!("{}", hex_data),
    }
    Ok(())
}

async fn serve(dispatcher: &Dispatcher, args: ServeArgs) -> anyhow::Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    serve_lines(dispatcher, input, Duration::from_secs(args.timeout), |line| {
        println!("{}", line)
    })
    .await
}

/// Submit every request line from `input` and hand each finished result to
/// `emit` as a `{"id", "data"}` JSON line. Returns once `input` is exhausted
/// and every waiter has either emitted or timed out.
async fn serve_lines<R, F>(
    dispatcher: &Dispatcher,
    input: R,
    timeout: Duration,
    emit: F,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    F: Fn(String) + Clone + Send + 'static,
{
    let mut lines = input.lines();
    let mut pending = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        // Malformed requests are dropped by the dispatcher; only poll for
        // ids that can actually be read back
        let id = serde_json::from_str::<serde_json::Value>(&line)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string));
        dispatcher.submit(&line);

        if let Some(id) = id {
            let store = dispatcher.store().clone();
            let emit = emit.clone();
            pending.spawn(async move {
                match store.wait(&id, POLL_INTERVAL, timeout).await {
                    Some(data) => {
                        store.remove(&id);
                        emit(serde_json::json!({ "id": id, "data": data }).to_string());
                    }
                    None => warn!("no result for {} after {:?}", id, timeout),
                }
            });
        }

        // Reap finished waiters so a long-running stream does not pile them up
        while let Some(res) = pending.try_join_next() {
            res.context("result waiter panicked")?;
        }
    }

    while let Some(res) = pending.join_next().await {
        res.context("result waiter panicked")?;
    }
    Ok(())
}
