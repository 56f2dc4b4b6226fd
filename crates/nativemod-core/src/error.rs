//! Error types for the modloader core.
//!
//! Only descriptor construction and directory enumeration raise these to the
//! caller. Per-binary and per-lifecycle-call failures are recorded on the
//! affected [`LoadOutcome`](crate::record::LoadOutcome) or logged.

use std::path::PathBuf;

/// Modloader error type.
#[derive(Debug, thiserror::Error)]
pub enum ModloaderError {
    /// A binary passed to descriptor construction does not exist.
    #[error("File not found: {0}")]
    NotFound(String),

    /// A load directory exists but could not be enumerated.
    #[error("Failed to read directory {}: {source}", path.display())]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The filename pattern is not a valid glob.
    #[error("Invalid filename pattern: {0}")]
    InvalidPattern(String),

    /// The platform loader refused to open a binary.
    #[error("Failed to load library: {0}")]
    LoadFailed(String),

    /// Symbol resolution failed for a reason other than absence.
    #[error("Symbol lookup failed: {0}")]
    Symbol(String),

    /// A lifecycle entry point faulted inside the call dispatch.
    #[error("Lifecycle call `{step}` faulted in {binary}: {message}")]
    LifecycleFault {
        step: &'static str,
        binary: String,
        message: String,
    },

    /// An argument crossing the ABI boundary was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, ModloaderError>;

impl From<toml::de::Error> for ModloaderError {
    fn from(err: toml::de::Error) -> Self {
        ModloaderError::Config(err.to_string())
    }
}

impl From<glob::PatternError> for ModloaderError {
    fn from(err: glob::PatternError) -> Self {
        ModloaderError::InvalidPattern(err.to_string())
    }
}

impl From<libloading::Error> for ModloaderError {
    fn from(err: libloading::Error) -> Self {
        ModloaderError::LoadFailed(err.to_string())
    }
}
