//! Error types for the SX request pipeline.
//!
//! # Design
//! Each pipeline stage owns one error type so callers can tell "never sent"
//! (`BuildError`) apart from "sent but failed" (`TransportError`) and "answered
//! but unreadable" (`DecodeError`). `ProjectionError` exists only so the typed
//! envelope projection can report why `result` stayed empty; it never fails a
//! call. The umbrella `Error` is what `?` produces inside the transport.

use std::time::Duration;

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The request could not be constructed and was never sent.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("POST request without a body")]
    MissingBody,

    #[error("GET request cannot carry a body")]
    UnexpectedBody,

    #[error("client certificate `{key}`: {reason}")]
    Certificate { key: String, reason: String },

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("multipart file `{path}`: {source}")]
    MultipartFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The exchange with the remote endpoint failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Http(#[from] ureq::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no async runtime available to dispatch the request")]
    NoRuntime,

    #[error("background task failed: {0}")]
    Task(String),
}

/// The response arrived but could not be turned into text.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported charset `{0}`")]
    UnsupportedCharset(String),

    #[error("{algorithm} decompression failed: {source}")]
    Decompression {
        algorithm: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {charset} text: {reason}")]
    InvalidText { charset: &'static str, reason: String },

    #[error("reading response body failed: {0}")]
    Read(#[source] std::io::Error),
}

/// The raw body is not an `ApiResult` document.
#[derive(Debug, Error)]
#[error("typed projection failed: {0}")]
pub struct ProjectionError(#[from] pub serde_json::Error);

/// Any failure of a single call.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Category label used in failure envelopes and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Build(_) => "build",
            Error::Transport(_) => "transport",
            Error::Decode(_) => "decode",
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Error::Transport(TransportError::Http(err))
    }
}
