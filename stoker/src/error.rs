//! Represents an error raised by the core

use std::convert::Infallible;
use std::fmt;
use std::error::Error as StdError;
use std::io::Error as IoError;

pub use kind::ErrorKind;

pub mod kind;

type BoxError = Box<
    dyn StdError
    + Send
    + Sync
>;

/// Represents a core error with a stable machine-readable kind
#[derive(Debug)]
pub struct Error {
    pub(crate) kind: ErrorKind,
    inner: BoxError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Self {
            inner: err.into(),
            kind: ErrorKind::Internal
        }
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Self {
            inner: err.into(),
            kind: ErrorKind::Internal
        }
    }
}

impl From<Infallible> for Error {
    fn from(infallible: Infallible) -> Error {
        match infallible {}
    }
}

impl Error {
    /// Creates a new [`Error`]
    #[inline]
    pub fn new(kind: ErrorKind, err: impl Into<BoxError>) -> Error {
        Self {
            inner: err.into(),
            kind
        }
    }

    /// Returns the machine-readable kind of this error
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Renders the kind, the message and the full source chain as a textual trace
    pub fn trace(&self) -> String {
        let mut trace = format!("{}: {}", self.kind, self.inner);
        let mut source = self.inner.source();
        while let Some(err) = source {
            trace.push_str("\n  caused by: ");
            trace.push_str(&err.to_string());
            source = err.source();
        }
        trace
    }
}

/// Extracts a human-readable message from a panic payload
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).into()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked".into()
    }
}
