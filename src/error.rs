//! Error types for the export pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering and exporting a chart
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to initialize the engine
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// A dataset or static asset is missing or unreadable
    #[error("Resource unavailable: {0}")]
    ResourceError(String),

    /// Failed to load a widget address
    #[error("Failed to load URL: {0}")]
    LoadError(String),

    /// The widget's drawing script failed
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Failed to capture the rendered frame
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// The engine worker went away before replying
    #[error("Render worker unavailable: {0}")]
    WorkerLost(String),

    /// The pixel buffer does not match the declared dimensions
    #[error("Frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    FormatError {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    /// PNG codec failure
    #[error("PNG encoding failed: {0}")]
    EncodeError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Filesystem failure outside of dataset loading
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),
}

/// Coarse error classes as seen by the HTTP boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Resource,
    Render,
    Format,
    Encode,
    Config,
}

impl Error {
    /// Classify this error. Every class maps to a 5xx response; the class
    /// only decides what gets logged.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ResourceError(_) | Error::Io(_) => ErrorKind::Resource,
            Error::InitializationError(_)
            | Error::LoadError(_)
            | Error::ScriptError(_)
            | Error::RenderError(_)
            | Error::Timeout(_)
            | Error::WorkerLost(_) => ErrorKind::Render,
            #[cfg(feature = "cdp")]
            Error::CdpError(_) => ErrorKind::Render,
            Error::FormatError { .. } => ErrorKind::Format,
            Error::EncodeError(_) => ErrorKind::Encode,
            Error::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// Whether this is a render timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

impl From<png::EncodingError> for Error {
    fn from(err: png::EncodingError) -> Self {
        Error::EncodeError(err.to_string())
    }
}
