//! Error types shared by every component in this crate

use std::fmt;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by topology building, reconciliation and alarm resolution
///
/// Every run-level operation reports exactly one of these as its terminal
/// failure; no partial result is returned alongside an error.
#[derive(Debug)]
pub enum Error {
    /// Malformed input to a component (e.g. a role missing from the topology)
    Validation(String),

    /// A remote entity does not exist (404-equivalent)
    RemoteNotFound(String),

    /// Any other remote failure
    RemoteFailure(String),

    /// A templated probe field could not be rendered
    TemplateRender(String),

    /// Invalid use of a task queue (push after close)
    QueueMisuse(String),
}

impl Error {
    /// True for the 404-equivalent error kind
    ///
    /// Alarm resolution degrades a missing probe to a sentinel instead of
    /// failing the run; everything else treats not-found as fatal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::RemoteNotFound(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "invalid input: {}", msg),
            Error::RemoteNotFound(msg) => write!(f, "not found: {}", msg),
            Error::RemoteFailure(msg) => write!(f, "remote call failed: {}", msg),
            Error::TemplateRender(msg) => write!(f, "template rendering failed: {}", msg),
            Error::QueueMisuse(msg) => write!(f, "queue misuse: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
