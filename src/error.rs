//! Error types for the samples-file handler.
//!
//! This module defines [`FileHandlerError`], the single error type returned by
//! every fallible operation in the crate. Using the `thiserror` crate, it
//! provides structured variants that callers can match on instead of
//! inspecting message text.
//!
//! ## Error Kinds
//!
//! Every variant maps onto a coarse [`ErrorKind`]:
//!
//! - **`Busy`**: a reader or writer operation is already in flight on this
//!   handler. Inspect the busy flags and retry later.
//! - **`WrongMode`**: the handler's stream mode or read mode does not permit the
//!   requested operation (e.g. writing while in read mode).
//! - **`TaskState`**: the background scan worker is in a state that forbids the
//!   request (already running, nothing to stop, faulted and not yet reaped).
//! - **`Pattern`**: the file-name regular expression supplied for scanning does
//!   not compile.
//! - **`Io`**: a filesystem operation failed while reading or writing a samples
//!   file.
//! - **`Config`**: configuration could not be loaded or failed validation.
//!
//! Lock contention and malformed sample tokens are deliberately *not* errors;
//! see [`crate::directory::is_locked`] and [`crate::complex::ComplexSample::parse`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::handler::{ReadMode, ScanTaskState, StreamMode};

/// Result type alias for handler operations.
pub type Result<T> = std::result::Result<T, FileHandlerError>;

/// Coarse classification of a [`FileHandlerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A reader or writer is already busy.
    Busy,
    /// Operation not permitted in the current mode.
    WrongMode,
    /// The scan worker is in an incompatible lifecycle state.
    TaskState,
    /// Invalid file-name pattern.
    Pattern,
    /// Filesystem failure.
    Io,
    /// Configuration failure.
    Config,
}

/// The resource guarded by a busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyResource {
    /// The on-demand writer.
    Writer,
    /// The on-demand reader or the scan worker.
    Reader,
}

impl fmt::Display for BusyResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Writer => write!(f, "writer"),
            Self::Reader => write!(f, "reader"),
        }
    }
}

/// Errors that can occur while operating a [`crate::FileHandler`].
#[derive(Error, Debug)]
pub enum FileHandlerError {
    /// A guarded operation is already in flight.
    #[error("The {resource} is busy; wait for the current operation to finish")]
    Busy {
        /// Flag that was already set
        resource: BusyResource,
    },

    /// The handler mode does not allow the operation.
    #[error("Cannot {operation} while in {mode:?} mode (read mode {read_mode:?})")]
    WrongMode {
        /// What the caller tried to do
        operation: &'static str,
        /// Stream mode at the time of the call
        mode: StreamMode,
        /// Read mode at the time of the call
        read_mode: ReadMode,
    },

    /// The scan worker lifecycle forbids the request.
    #[error("{message} (scan task state: {state:?})")]
    TaskState {
        /// Why the request was refused
        message: &'static str,
        /// Worker slot state at the time of the call
        state: ScanTaskState,
    },

    /// The scan worker died without returning a result.
    #[error("Scan worker fault: {message}")]
    ScanFault {
        /// Panic payload or spawn failure
        message: String,
    },

    /// The file-name pattern is not a valid regular expression.
    #[error("Invalid file pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Pattern as supplied
        pattern: String,
        /// Compilation error
        #[source]
        source: regex::Error,
    },

    /// I/O error on a specific path.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        /// File or directory being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A blocking task on the Tokio pool was cancelled or panicked.
    #[error("Blocking file task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    /// Configuration validation error.
    #[error("Configuration validation error: {0}")]
    Config(String),

    /// Configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl FileHandlerError {
    /// Build an [`FileHandlerError::Io`] for `path`.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy { .. } => ErrorKind::Busy,
            Self::WrongMode { .. } => ErrorKind::WrongMode,
            Self::TaskState { .. } | Self::ScanFault { .. } | Self::Blocking(_) => {
                ErrorKind::TaskState
            }
            Self::InvalidPattern { .. } => ErrorKind::Pattern,
            Self::Io { .. } => ErrorKind::Io,
            Self::Config(_) | Self::Figment(_) => ErrorKind::Config,
        }
    }

    /// Check if a busy flag rejected the operation.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.kind() == ErrorKind::Busy
    }

    /// Check if the handler mode rejected the operation.
    #[must_use]
    pub fn is_wrong_mode(&self) -> bool {
        self.kind() == ErrorKind::WrongMode
    }

    /// Check if the scan worker state rejected the operation.
    #[must_use]
    pub fn is_task_state(&self) -> bool {
        self.kind() == ErrorKind::TaskState
    }
}

impl From<figment::Error> for FileHandlerError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}
