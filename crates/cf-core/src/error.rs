//! Unified error type for the clipforge engine.
//!
//! Every crate funnels its failures into [`Error`]. Callers that only care
//! about the coarse category (for fallback decisions, user-facing reports,
//! exit codes) use [`Error::kind`], which maps onto [`ErrorKind`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unified error type covering all failure modes of the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input path does not exist.
    #[error("file not found: {}", path.display())]
    NotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// The probe could not parse the container.
    #[error("unreadable media {}: {reason}", path.display())]
    UnreadableMedia {
        /// The file that failed to parse.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },

    /// A stage parameter failed validation.
    #[error("invalid parameter [{stage}]: {message}")]
    InvalidParameter {
        /// The stage that rejected its parameters.
        stage: String,
        /// Human-readable error description.
        message: String,
    },

    /// The pipeline graph itself is malformed.
    #[error("incompatible pipeline: {0}")]
    IncompatiblePipeline(String),

    /// The stream combination cannot be expressed by the engine.
    #[error("unsupported combination: {0}")]
    UnsupportedCombination(String),

    /// The external engine refused the invocation for a parameter or codec
    /// reason. Recoverable by re-encoding.
    #[error("engine rejected [{tool}]: {message}")]
    EngineRejected {
        /// Name of the tool that failed.
        tool: String,
        /// The most relevant diagnostic line.
        message: String,
        /// Full captured stderr.
        stderr: String,
    },

    /// The external engine failed for any other reason.
    #[error("engine failed [{tool}]: {message}")]
    EngineFailed {
        /// Name of the tool that failed.
        tool: String,
        /// The most relevant diagnostic line.
        message: String,
        /// Full captured stderr.
        stderr: String,
    },

    /// An invocation exceeded its wall-clock budget and was killed.
    #[error("{tool} timed out after {timeout:?}")]
    Timeout {
        /// Name of the tool that was killed.
        tool: String,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// An optional capability (analysis backend) is not installed.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// The job was stopped by request.
    #[error("cancelled")]
    Cancelled,

    /// An external tool could not be launched.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Configuration or request data failed to parse.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error category reported alongside every diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    UnreadableMedia,
    InvalidParameter,
    IncompatiblePipeline,
    UnsupportedCombination,
    EngineRejected,
    EngineFailed,
    Timeout,
    CapabilityUnavailable,
    Cancelled,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::UnreadableMedia => "unreadable-media",
            ErrorKind::InvalidParameter => "invalid-parameter",
            ErrorKind::IncompatiblePipeline => "incompatible-pipeline",
            ErrorKind::UnsupportedCombination => "unsupported-combination",
            ErrorKind::EngineRejected => "engine-rejected",
            ErrorKind::EngineFailed => "engine-failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CapabilityUnavailable => "capability-unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Map this error to its coarse [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::UnreadableMedia { .. } => ErrorKind::UnreadableMedia,
            Error::InvalidParameter { .. } | Error::Validation(_) => ErrorKind::InvalidParameter,
            Error::IncompatiblePipeline(_) => ErrorKind::IncompatiblePipeline,
            Error::UnsupportedCombination(_) => ErrorKind::UnsupportedCombination,
            Error::EngineRejected { .. } => ErrorKind::EngineRejected,
            Error::EngineFailed { .. } | Error::Tool { .. } => ErrorKind::EngineFailed,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::CapabilityUnavailable(_) => ErrorKind::CapabilityUnavailable,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io { .. } => ErrorKind::Io,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a re-encode fallback may recover from this error.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::EngineRejected
    }

    /// Verbatim engine diagnostics, when the error carries any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::EngineRejected { stderr, .. } | Error::EngineFailed { stderr, .. } => {
                Some(stderr)
            }
            _ => None,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(path: impl AsRef<Path>) -> Self {
        Error::NotFound {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Convenience constructor for [`Error::UnreadableMedia`].
    pub fn unreadable(path: impl AsRef<Path>, reason: impl fmt::Display) -> Self {
        Error::UnreadableMedia {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Convenience constructor for [`Error::InvalidParameter`].
    pub fn invalid(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::IncompatiblePipeline`].
    pub fn incompatible(message: impl Into<String>) -> Self {
        Error::IncompatiblePipeline(message.into())
    }

    /// Convenience constructor for [`Error::UnsupportedCombination`].
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedCombination(message.into())
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
