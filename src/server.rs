//! HTTP front end over `tiny_http`.
//!
//! A few acceptor threads pull requests off the listener and hand each one to
//! the tokio runtime as its own task. Routes:
//!
//! - `GET /export/{chart}/png?...` renders a catalogue chart
//! - `GET /dataset/{name}/info` serves the dataset info JSON
//! - `GET /dataset/{name}/data` serves the dataset CSV
//!
//! Pipeline failures are logged and answered with an empty 500.

use crate::charts;
use crate::dataset::{DatasetRegistry, DirResourceStore, DEFAULT_DATASETS};
use crate::export::Exporter;
use crate::gate::RenderGate;
use crate::widget::WidgetBuilder;
use crate::{Backend, EngineConfig, Error, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tiny_http::{Header, Method, Request, Response, Server};
use tokio::runtime::Handle;

/// Everything needed to bring the service up
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: String,
    /// Directory holding `{dataset}.info.json` and the CSV files
    pub resources_dir: PathBuf,
    /// Directory widgets are written to; must hold the charting bundle
    pub widgets_dir: PathBuf,
    /// Where exported charts are saved, if anywhere
    pub export_dir: Option<PathBuf>,
    pub datasets: Vec<String>,
    pub engine: EngineConfig,
    pub backend: Backend,
    /// Number of acceptor threads
    pub workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            resources_dir: PathBuf::from("resources"),
            widgets_dir: PathBuf::from("widgets"),
            export_dir: Some(PathBuf::from("images")),
            datasets: DEFAULT_DATASETS.iter().map(|s| s.to_string()).collect(),
            engine: EngineConfig::default(),
            #[cfg(feature = "cdp")]
            backend: Backend::Cdp,
            #[cfg(not(feature = "cdp"))]
            backend: Backend::Software,
            workers: num_cpus::get(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.workers == 0 {
            return Err(Error::ConfigError("at least one acceptor thread is required".into()));
        }
        if self.datasets.is_empty() {
            return Err(Error::ConfigError("no datasets configured".into()));
        }
        Ok(())
    }

    /// Load datasets, prepare the widget dir and start the engine.
    ///
    /// Any failure here is a startup failure.
    pub async fn build_exporter(&self) -> Result<Exporter> {
        self.validate()?;
        let names: Vec<&str> = self.datasets.iter().map(String::as_str).collect();
        let datasets = DatasetRegistry::load(&DirResourceStore::new(&self.resources_dir), &names)?;

        let widgets = WidgetBuilder::new(&self.widgets_dir)?;
        if self.backend != Backend::Software {
            widgets.verify_chart_script()?;
        }

        let factory = self.backend.factory(self.engine.clone());
        let gate = RenderGate::start(factory, self.engine.render_timeout()).await?;
        info!("Started {} render engine", self.backend.name());

        let exporter = Exporter::new(Arc::new(datasets), widgets, gate);
        Ok(match &self.export_dir {
            Some(dir) => exporter.with_export_dir(dir),
            None => exporter,
        })
    }
}

/// A response computed by the router, before it is written to the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

impl Reply {
    fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self { status: 200, content_type: Some(content_type), body: body.into() }
    }

    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("text/plain; charset=utf-8"),
            body: body.into().into_bytes(),
        }
    }

    fn empty(status: u16) -> Self {
        Self { status, content_type: None, body: Vec::new() }
    }

    fn into_response(self) -> Response<std::io::Cursor<Vec<u8>>> {
        let mut response = Response::from_data(self.body).with_status_code(self.status);
        if let Some(ct) = self.content_type {
            if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], ct.as_bytes()) {
                response = response.with_header(header);
            }
        }
        response
    }
}

/// Route a GET request for `url` (path plus optional query)
pub async fn route(exporter: &Exporter, url: &str) -> Reply {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match segments.as_slice() {
        ["export", chart, "png"] => export_png(exporter, chart, query).await,
        ["dataset", name, "info"] => match exporter.datasets().get(name) {
            Ok(ds) => Reply::ok("application/json", ds.info_json.clone()),
            Err(_) => Reply::text(404, format!("Unknown dataset `{}`", name)),
        },
        ["dataset", name, "data"] => match exporter.datasets().get(name) {
            Ok(ds) => Reply::ok("text/csv; charset=utf-8", ds.csv_content.clone()),
            Err(_) => Reply::text(404, format!("Unknown dataset `{}`", name)),
        },
        _ => Reply::text(404, "Not Found"),
    }
}

async fn export_png(exporter: &Exporter, name: &str, query: &str) -> Reply {
    let chart = match charts::find(name) {
        Some(c) => c,
        None => return Reply::text(404, format!("Unknown chart `{}`", name)),
    };
    let params = match chart.params_from_query(query) {
        Ok(p) => p,
        Err(e) => return Reply::text(400, e.to_string()),
    };
    match exporter.export_chart(chart, params).await {
        Ok(image) => Reply::ok(image.format.mime_type(), image.bytes),
        Err(e) => {
            error!("Export of {} failed ({:?}): {}", name, e.kind(), e);
            Reply::empty(500)
        }
    }
}

/// The listening server
pub struct ChartServer {
    server: Arc<Server>,
    exporter: Arc<Exporter>,
    stopping: Arc<AtomicBool>,
}

impl ChartServer {
    pub fn bind(addr: &str, exporter: Arc<Exporter>) -> Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| Error::InitializationError(format!("Failed to bind {}: {}", addr, e)))?;
        Ok(Self {
            server: Arc::new(server),
            exporter,
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Start `acceptors` threads that dispatch requests onto `handle`
    pub fn spawn_acceptors(&self, acceptors: usize, handle: Handle) -> Result<Vec<JoinHandle<()>>> {
        (0..acceptors.max(1))
            .map(|i| {
                let server = self.server.clone();
                let exporter = self.exporter.clone();
                let stopping = self.stopping.clone();
                let handle = handle.clone();
                std::thread::Builder::new()
                    .name(format!("http-acceptor-{}", i))
                    .spawn(move || accept_loop(&server, &exporter, &stopping, &handle))
                    .map_err(Error::Io)
            })
            .collect()
    }

    /// Stop accepting; in-flight requests still finish
    pub fn shutdown(&self, acceptors: usize) {
        self.stopping.store(true, Ordering::SeqCst);
        for _ in 0..acceptors.max(1) {
            self.server.unblock();
        }
    }
}

fn accept_loop(server: &Server, exporter: &Arc<Exporter>, stopping: &AtomicBool, handle: &Handle) {
    loop {
        let request = match server.recv() {
            Ok(rq) => rq,
            Err(e) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                warn!("Failed to accept request: {}", e);
                continue;
            }
        };
        if stopping.load(Ordering::SeqCst) {
            let _ = request.respond(Reply::empty(503).into_response());
            break;
        }
        let exporter = exporter.clone();
        handle.spawn(handle_request(exporter, request));
    }
    debug!("Acceptor exiting");
}

async fn handle_request(exporter: Arc<Exporter>, request: Request) {
    let url = request.url().to_string();
    let reply = if *request.method() == Method::Get {
        route(&exporter, &url).await
    } else {
        Reply::text(405, "Method Not Allowed")
    };
    debug!("{} {} -> {}", request.method(), url, reply.status);

    // Writing may block on a slow client.
    let written = tokio::task::spawn_blocking(move || request.respond(reply.into_response())).await;
    match written {
        Ok(Err(e)) => debug!("Client went away before the reply was sent: {}", e),
        Err(e) => warn!("Responder task failed: {}", e),
        Ok(Ok(())) => {}
    }
}
