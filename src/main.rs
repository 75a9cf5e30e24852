use chartshot::server::{ChartServer, ServiceConfig};
use chartshot::{Backend, EngineConfig, Viewport};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chartshot")]
#[command(about = "Render charts in a headless browser and serve them as PNG")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory holding dataset info files and CSVs
    #[arg(long, default_value = "resources")]
    resources: PathBuf,

    /// Directory for widget documents; must contain charts.js
    #[arg(long, default_value = "widgets")]
    widgets: PathBuf,

    /// Directory exported charts are saved to
    #[arg(long, default_value = "images")]
    export_dir: PathBuf,

    /// Do not save exported charts to disk
    #[arg(long)]
    no_export: bool,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1024)]
    width: u32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 768)]
    height: u32,

    /// Upper bound for one render pass
    #[arg(long, default_value_t = 60000)]
    render_timeout_ms: u64,

    /// Render backend: `cdp` or `software`
    #[arg(long, default_value = if cfg!(feature = "cdp") { "cdp" } else { "software" })]
    backend: String,

    /// Chrome/Chromium binary (auto-detected by default)
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Run Chrome without its sandbox (needed in some containers)
    #[arg(long)]
    no_sandbox: bool,

    /// Number of HTTP acceptor threads (defaults to the CPU count)
    #[arg(long)]
    workers: Option<usize>,
}

impl Args {
    fn into_config(self) -> chartshot::Result<ServiceConfig> {
        let backend: Backend = self.backend.parse()?;
        let defaults = ServiceConfig::default();
        let config = ServiceConfig {
            bind: self.bind,
            resources_dir: self.resources,
            widgets_dir: self.widgets,
            export_dir: (!self.no_export).then_some(self.export_dir),
            engine: EngineConfig {
                viewport: Viewport { width: self.width, height: self.height },
                render_timeout_ms: self.render_timeout_ms,
                chrome_path: self.chrome,
                sandbox: !self.no_sandbox,
                ..Default::default()
            },
            backend,
            workers: self.workers.unwrap_or(defaults.workers),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();

    let config = Args::parse().into_config()?;
    let exporter = Arc::new(config.build_exporter().await?);

    let server = ChartServer::bind(&config.bind, exporter)?;
    let acceptors = server.spawn_acceptors(config.workers, tokio::runtime::Handle::current())?;
    info!(
        "Listening on {} with {} acceptor(s)",
        server
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| config.bind.clone()),
        acceptors.len()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.shutdown(acceptors.len());
    tokio::task::spawn_blocking(move || {
        for acceptor in acceptors {
            let _ = acceptor.join();
        }
    })
    .await?;
    Ok(())
}
