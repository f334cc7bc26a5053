//! Crate-level error types
//!
//! Each subsystem defines its own error enum; this module ties them together
//! into a single [`Error`] for the server surface. Malformed input and
//! capacity rejections are handled at their call sites with counters and are
//! not routed through here; [`Error`] is for failures the caller must see
//! (startup, I/O, misconfiguration).

use std::io;

use crate::protocol::ProtocolError;
use crate::registry::RegistryError;
use crate::sched::SchedulerError;
use crate::stream::StreamError;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O failure (socket bind, list file read)
    Io(io::Error),
    /// Wire protocol violation surfaced to a caller
    Protocol(ProtocolError),
    /// Client registry rejection
    Registry(RegistryError),
    /// Stream manager rejection
    Stream(StreamError),
    /// Scheduler rejection
    Scheduler(SchedulerError),
    /// Invalid configuration detected at startup
    Config(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
            Error::Registry(e) => write!(f, "registry error: {}", e),
            Error::Stream(e) => write!(f, "stream error: {}", e),
            Error::Scheduler(e) => write!(f, "scheduler error: {}", e),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Stream(e) => Some(e),
            Error::Scheduler(e) => Some(e),
            Error::Config(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<StreamError> for Error {
    fn from(e: StreamError) -> Self {
        Error::Stream(e)
    }
}

impl From<SchedulerError> for Error {
    fn from(e: SchedulerError) -> Self {
        Error::Scheduler(e)
    }
}
