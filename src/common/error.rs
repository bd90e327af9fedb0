//! Error types for redcluster
//!
//! [`Error`] describes what went wrong. [`ErrorKind`] classifies a failure
//! at the reconcile step that detected it, and [`ReconcileError`] carries
//! that classification together with the failing operation.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Protocol Errors ===
    #[error("RESP protocol error: {0}")]
    Protocol(String),

    #[error("Node {node} rejected {command}: {reason}")]
    NodeCommand {
        node: String,
        command: String,
        reason: String,
    },

    #[error("Malformed cluster nodes line: {0}")]
    MalformedNodeLine(String),

    // === Network Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Node {node} failed: {reason}")]
    NodeFailed { node: String, reason: String },

    #[error("No reachable nodes among {0} targets")]
    NoReachableNodes(usize),

    #[error("Node {0} is not part of this session")]
    UnknownNode(String),

    // === Planning Errors ===
    #[error("Insufficient nodes: need {needed}, have {available}")]
    InsufficientNodes { needed: usize, available: usize },

    #[error("Too many nodes: need {needed}, have {available}")]
    TooManyNodes { needed: usize, available: usize },

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    // === Platform Errors ===
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Attach the address of the node an error came from.
    pub fn on_node(self, node: impl Into<String>) -> Self {
        match self {
            e @ (Error::NodeFailed { .. } | Error::NodeCommand { .. }) => e,
            other => Error::NodeFailed {
                node: node.into(),
                reason: other.to_string(),
            },
        }
    }

    /// Address of the node that failed, when the error names one.
    pub fn node(&self) -> Option<&str> {
        match self {
            Error::NodeFailed { node, .. } | Error::NodeCommand { node, .. } => Some(node),
            _ => None,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

/// Classification of a failed reconcile step.
///
/// The kind only selects how soon the caller retries; it never changes what
/// was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The process-group platform (orchestration, pod listing) failed.
    Platform,
    /// A precondition is not met yet; retry shortly.
    NotReady,
    /// Talking to a cluster node failed.
    DataPlane,
    /// Planning or logic failure with no external cause.
    Internal,
}

impl ErrorKind {
    /// Wrap `source` as a failure of `op` classified with this kind.
    pub fn wrap(self, source: Error, op: &'static str) -> ReconcileError {
        ReconcileError {
            kind: self,
            op,
            source,
        }
    }

    /// Whether a failure of this kind should be surfaced loudly.
    pub fn is_benign(&self) -> bool {
        matches!(self, ErrorKind::NotReady)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Platform => write!(f, "platform"),
            ErrorKind::NotReady => write!(f, "not-ready"),
            ErrorKind::DataPlane => write!(f, "data-plane"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// A classified failure of one reconcile pass.
#[derive(Error, Debug)]
#[error("{kind} error in {op}: {source}")]
pub struct ReconcileError {
    pub kind: ErrorKind,
    pub op: &'static str,
    #[source]
    pub source: Error,
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Delay before the next pass, per the caller's requeue policy.
    pub fn requeue_after(&self, policy: &crate::common::RequeuePolicy) -> Duration {
        policy.delay_for(self.kind)
    }
}
