//! Error types for the Trishul pipeline
//!
//! Every error the core raises, plus the ones the transport and plugins
//! share with it.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

use crate::types::StageRole;

/// Boxed error kept as the cause of a must-stop condition.
pub type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum TrishulError {
    #[error("{0} stage input queue is closed")]
    QueueClosed(StageRole),

    #[error("{0} stage was already started")]
    AlreadyStarted(StageRole),

    #[error("{0} stage does not accept routed work items")]
    NotRoutable(StageRole),

    #[error("{stage} stage emitted a malformed work item: {reason}")]
    ProtocolViolation { stage: StageRole, reason: String },

    #[error("{role} stage crashed: {message}")]
    StageCrashed { role: StageRole, message: String },

    #[error("{message}")]
    MustStop {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    #[error("Scan stopped by user request")]
    MustStopByUserRequest,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl TrishulError {
    /// Build a must-stop error that keeps the original cause.
    pub fn must_stop(message: impl Into<String>, cause: impl Into<BoxedCause>) -> Self {
        Self::MustStop {
            message: message.into(),
            source: Some(cause.into()),
        }
    }

    /// Fatal errors abort the whole scan instead of being logged and absorbed.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::MustStop { .. } | Self::MustStopByUserRequest)
    }
}

/// Result type alias for Trishul operations
pub type TrishulResult<T> = Result<T, TrishulError>;

/// Walk an `anyhow` chain looking for a fatal `TrishulError`.
pub fn is_fatal_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<TrishulError>())
        .any(TrishulError::is_fatal)
}
