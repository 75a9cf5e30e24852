//! Chartshot
//!
//! Server-side chart export: a dataset and drawing parameters go in, a PNG
//! comes out. A chart widget (HTML + inline script) is written to disk, a
//! single headless browser session loads it, the painted frame is captured,
//! normalized to RGBA and encoded as PNG.
//!
//! # Features
//!
//! - **CDP Backend** (default): headless Chrome via the Chrome DevTools Protocol
//! - **Software Backend**: deterministic pure-Rust raster, no browser needed
//! - **Serialized Rendering**: one engine per process behind a single-admission gate
//!
//! # Example
//!
//! ```no_run
//! use chartshot::{Backend, EngineConfig, Viewport};
//! use chartshot::dataset::{DatasetRegistry, DirResourceStore, DEFAULT_DATASETS};
//! use chartshot::export::{Exporter, RenderRequest};
//! use chartshot::gate::RenderGate;
//! use chartshot::widget::WidgetBuilder;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig {
//!     viewport: Viewport { width: 1024, height: 768 },
//!     ..Default::default()
//! };
//! let store = DirResourceStore::new("resources");
//! let datasets = DatasetRegistry::load(&store, DEFAULT_DATASETS)?;
//! let factory = Backend::Software.factory(config.clone());
//! let gate = RenderGate::start(factory, config.render_timeout()).await?;
//! let exporter = Exporter::new(Arc::new(datasets), WidgetBuilder::new("widgets")?, gate);
//!
//! let request = RenderRequest::new(
//!     "fossil-fuels-consumption",
//!     "window.drawFossilFuelsConsumptionChart",
//!     vec!["line".into(), true.into(), false.into()],
//! );
//! let png = exporter.export(&request).await?;
//! std::fs::write("chart.png", &png.bytes)?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod charts;
pub mod codec;
pub mod dataset;
pub mod export;
pub mod frame;
pub mod gate;
pub mod raster;
pub mod server;
pub mod widget;

#[cfg(feature = "cdp")]
pub mod cdp;

pub use codec::{EncodedImage, ImageFormat};
pub use frame::{AlphaMode, ChannelOrder, RawFrame, RgbaFrame};

/// Configuration for a render engine
///
/// The defaults are conservative: a 1024x768 viewport, 30 s to load a
/// widget, 60 s for a whole render pass and a short settle delay after load.
///
/// # Examples
///
/// ```
/// let cfg = chartshot::EngineConfig::default();
/// assert!(cfg.validate().is_ok());
/// assert_eq!(cfg.viewport.width, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Viewport dimensions; captured frames have exactly this size
    pub viewport: Viewport,
    /// Timeout for a single navigation in milliseconds
    pub navigation_timeout_ms: u64,
    /// Timeout for a whole render pass, enforced by the render gate
    pub render_timeout_ms: u64,
    /// Delay after load before capturing, in milliseconds
    pub settle_ms: u64,
    /// Chrome/Chromium binary; auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Whether Chrome runs with its sandbox enabled
    pub sandbox: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            navigation_timeout_ms: 30000,
            render_timeout_ms: 60000,
            settle_ms: 250,
            chrome_path: None,
            sandbox: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError(format!(
                "viewport must be non-empty, got {}x{}",
                self.viewport.width, self.viewport.height
            )));
        }
        if self.navigation_timeout_ms == 0 || self.render_timeout_ms == 0 {
            return Err(Error::ConfigError("timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
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
            width: 1024,
            height: 768,
        }
    }
}

/// Core trait for render engine implementations
///
/// An engine owns one rendering session and is driven from a single thread.
/// The render gate calls [`navigate`](RenderEngine::navigate),
/// [`check_scripts`](RenderEngine::check_scripts) and
/// [`capture`](RenderEngine::capture) in that order for every pass; an engine
/// must stay usable after any of them fails.
pub trait RenderEngine {
    /// Create a new engine instance with the given configuration
    fn new(config: EngineConfig) -> Result<Self>
    where
        Self: Sized;

    /// Load `address` and block until the document has finished loading
    fn navigate(&mut self, address: &str) -> Result<()>;

    /// Report failures of the scripts that ran during load
    fn check_scripts(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read back the current frame buffer
    fn capture(&mut self) -> Result<RawFrame>;

    /// A handle that interrupts a pass from another thread. Engines that
    /// cannot be interrupted return `None` and the gate waits for the pass
    /// to return on its own.
    fn abort_handle(&self) -> Option<AbortHandle> {
        None
    }

    /// Close the engine and clean up resources
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Interrupts a running engine from outside its worker thread.
///
/// Taken from [`RenderEngine::abort_handle`] right after the engine starts.
/// Aborting an engine that is already gone does nothing.
#[derive(Clone)]
pub struct AbortHandle(std::sync::Arc<dyn Fn() + Send + Sync>);

impl AbortHandle {
    pub fn new(abort: impl Fn() + Send + Sync + 'static) -> Self {
        Self(std::sync::Arc::new(abort))
    }

    pub fn abort(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AbortHandle")
    }
}

/// Available engine backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Headless Chrome over the DevTools protocol
    #[cfg(feature = "cdp")]
    Cdp,
    /// Deterministic software raster
    Software,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "cdp")]
            Backend::Cdp => "cdp",
            Backend::Software => "software",
        }
    }

    /// A factory that builds a fresh engine of this backend on every call
    pub fn factory(self, config: EngineConfig) -> gate::EngineFactory {
        std::sync::Arc::new(move || new_engine(self, config.clone()))
    }
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            #[cfg(feature = "cdp")]
            "cdp" | "chrome" => Ok(Backend::Cdp),
            "software" => Ok(Backend::Software),
            other => Err(Error::ConfigError(format!("unknown backend `{}`", other))),
        }
    }
}

/// Create a new engine instance for `backend`
pub fn new_engine(backend: Backend, config: EngineConfig) -> Result<Box<dyn RenderEngine>> {
    config.validate()?;
    match backend {
        #[cfg(feature = "cdp")]
        Backend::Cdp => Ok(Box::new(cdp::CdpEngine::new(config)?)),
        Backend::Software => Ok(Box::new(raster::SoftwareEngine::new(config)?)),
    }
}
