use crate::protocol::ProtocolError;
use cuex_catalog::CatalogError;
use cuex_core::{Classify, ErrorKind, TestCondition};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("config: {0}")]
    Invalid(String),
}

impl Classify for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::AssetError
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("subject id {0:?} must be non-empty and free of path separators")]
    InvalidSubject(String),

    #[error("test number must be 1 or 2, got {0}")]
    InvalidTestNumber(u8),

    #[error("{test} is not part of test {number}")]
    WrongTest { test: TestCondition, number: u8 },

    #[error("not ready: {}", .0.join(", "))]
    NotReady(Vec<&'static str>),

    #[error("cannot create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("control link: {0}")]
    Link(#[from] std::io::Error),

    #[error("control link closed")]
    LinkClosed,

    #[error("no latency replies within {0:?}")]
    NoReplies(std::time::Duration),

    #[error("average round trip {average_ms:.3} ms exceeds {threshold_ms:.3} ms")]
    LatencyExceeded { average_ms: f64, threshold_ms: f64 },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl Classify for SessionError {
    fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidSubject(_)
            | SessionError::InvalidTestNumber(_)
            | SessionError::WrongTest { .. }
            | SessionError::Io { .. } => ErrorKind::AssetError,
            SessionError::NotReady(_)
            | SessionError::Link(_)
            | SessionError::LinkClosed
            | SessionError::NoReplies(_) => ErrorKind::DeviceNotReady,
            SessionError::LatencyExceeded { .. } => ErrorKind::LatencyExceeded,
            SessionError::Protocol(e) => e.kind(),
            SessionError::Config(e) => e.kind(),
            SessionError::Catalog(e) => e.kind(),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
