// SPDX-License-Identifier: MPL-2.0

//! Error types for camhub
//!
//! Each layer has its own enum; [`AppError`] aggregates them for the binary.

use crate::session::{PeerId, RecordingKind};
use thiserror::Error;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for graph construction
pub type GraphResult<T> = Result<T, GraphError>;

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building or driving media graphs
#[derive(Debug, Error)]
pub enum GraphError {
    /// An element factory is missing or refused to build
    #[error("failed to create {factory}: {reason}")]
    Construction { factory: String, reason: String },
    /// Two elements or pads could not be negotiated
    #[error("failed to link {from} -> {to}")]
    Link { from: String, to: String },
    /// A pipeline refused a state change
    #[error("state change failed for {element}: {reason}")]
    StateChange { element: String, reason: String },
    /// An injection endpoint refused a buffer
    #[error("{element} refused data: {reason}")]
    Flow { element: String, reason: String },
    /// The requested tee point was never created
    #[error("tee point {0} is not available")]
    UnknownTeePoint(&'static str),
    /// Output directories could not be prepared
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    pub(crate) fn construction(factory: &str, reason: impl ToString) -> Self {
        Self::Construction {
            factory: factory.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn link(from: impl ToString, to: impl ToString) -> Self {
        Self::Link {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Recording-specific errors
#[derive(Debug, Error)]
pub enum RecordingError {
    /// A session of this kind is already starting, running or stopping
    #[error("{0} recording already in progress")]
    Busy(RecordingKind),
    #[error("failed to prepare recording output: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Peer session errors
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer {0} already has a session")]
    AlreadyExists(PeerId),
    #[error("peer {0} has no session")]
    NotFound(PeerId),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
}

/// Malformed control-channel messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("control message is not a JSON object")]
    NotAnObject,
    #[error("control message has no string \"type\" member")]
    MissingType,
    #[error("invalid file offer: {0}")]
    InvalidFile(String),
    #[error("failed to open transfer file: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
