//! Error taxonomy for the relay.
//!
//! Every variant maps to a `CloseCause` a Connection records on teardown
//! (see `connection::CloseCause`) except `Fatal`, which is the only kind
//! allowed to propagate out of the Acceptor loop and stop the Relay.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed stream: {0}")]
    MalformedStream(String),

    #[error("name resolution failed: {0}")]
    NameResolutionFailed(String),

    #[error("target unreachable: {0}")]
    TargetUnreachable(String),

    #[error("peer reset")]
    PeerReset,

    #[error("idle timeout")]
    IdleTimeout,

    #[error("admission rejected: {0}")]
    Admission(String),

    #[error("capacity error: {0}")]
    CapacityInternal(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn malformed_stream<S: Into<String>>(msg: S) -> Self {
        Error::MalformedStream(msg.into())
    }

    pub fn name_resolution_failed<S: Into<String>>(msg: S) -> Self {
        Error::NameResolutionFailed(msg.into())
    }

    pub fn target_unreachable<S: Into<String>>(msg: S) -> Self {
        Error::TargetUnreachable(msg.into())
    }

    pub fn admission<S: Into<String>>(msg: S) -> Self {
        Error::Admission(msg.into())
    }

    pub fn capacity_internal<S: Into<String>>(msg: S) -> Self {
        Error::CapacityInternal(msg.into())
    }

    pub fn fatal<S: Into<String>>(msg: S) -> Self {
        Error::Fatal(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// True for the handful of OS-level "socket already gone" conditions
    /// that the relay treats as a normal half-close rather than a real
    /// failure (see SPEC_FULL §9, half-open handling).
    pub fn is_peer_reset_io(e: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            e.kind(),
            ConnectionReset | ConnectionAborted | BrokenPipe | NotConnected | UnexpectedEof
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::TargetUnreachable(format!("timed out: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let e = Error::malformed_stream("bad atyp");
        assert!(matches!(e, Error::MalformedStream(_)));
    }

    #[test]
    fn test_error_display() {
        let e = Error::target_unreachable("connection refused");
        assert_eq!(e.to_string(), "target unreachable: connection refused");
    }

    #[test]
    fn test_peer_reset_classification() {
        let e = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(Error::is_peer_reset_io(&e));
        let e = io::Error::from(io::ErrorKind::InvalidInput);
        assert!(!Error::is_peer_reset_io(&e));
    }
}
