//! Error types and error handling strategy for reactimer.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Kernel timer facility and reactor failures are fatal: the loop loses its
//!   ability to wake for future timers, so they are surfaced, never retried
//! - Cancelling a timer that already fired or was already cancelled is not an
//!   error
//! - Callback panics are caught at the invocation site, the expiry batch is
//!   finished, and then the panic is re-raised (or the process aborts) per
//!   [`CallbackPanicPolicy`](crate::runtime::CallbackPanicPolicy)
//!
//! # Error Categories
//!
//! - **Facility**: Kernel timer facility arm/disarm/read failures
//! - **Loop**: Owner-loop misuse and polling failures
//! - **Config**: Invalid configuration values
//! - **Internal**: Broken invariants

use core::fmt;
use std::io;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Facility ===
    /// Arming, disarming, or reading the kernel timer facility failed.
    TimerFacility,
    /// No kernel timer facility is available on this platform.
    Unsupported,

    // === Loop ===
    /// Readiness polling or source registration failed.
    Reactor,
    /// Waking the owner loop from another thread failed.
    Wakeup,
    /// An event loop already exists on this thread.
    LoopAlreadyExists,
    /// `run` was called while the loop was already running.
    LoopAlreadyRunning,
    /// An owner-thread-only operation was invoked from another thread.
    NotInLoopThread,
    /// A timer callback panicked and took the loop thread down.
    CallbackPanicked,

    // === Config ===
    /// A configuration value failed validation or parsing.
    Config,

    // === Internal ===
    /// Internal error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::TimerFacility | Self::Unsupported => ErrorCategory::Facility,
            Self::Reactor
            | Self::Wakeup
            | Self::LoopAlreadyExists
            | Self::LoopAlreadyRunning
            | Self::NotInLoopThread
            | Self::CallbackPanicked => ErrorCategory::Loop,
            Self::Config => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns true if the owning loop cannot continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TimerFacility | Self::Reactor | Self::CallbackPanicked | Self::Internal
        )
    }
}

/// High-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Kernel timer facility errors.
    Facility,
    /// Event-loop errors.
    Loop,
    /// Configuration errors.
    Config,
    /// Internal errors.
    Internal,
}

/// The main error type for reactimer operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if the owning loop cannot continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Wraps a failed kernel timer facility operation.
    #[must_use]
    pub fn facility(op: &'static str, source: io::Error) -> Self {
        Self::new(ErrorKind::TimerFacility)
            .with_message(format!("timer facility {op} failed"))
            .with_source(source)
    }

    /// Wraps a failed reactor operation.
    #[must_use]
    pub fn reactor(op: &'static str, source: io::Error) -> Self {
        Self::new(ErrorKind::Reactor)
            .with_message(format!("reactor {op} failed"))
            .with_source(source)
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config).with_message(detail)
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::new(ErrorKind::Internal).with_source(e)
    }
}

/// A specialized Result type for reactimer operations.
pub type Result<T> = core::result::Result<T, Error>;
