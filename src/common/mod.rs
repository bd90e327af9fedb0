//! Common utilities and types shared across redcluster

pub mod config;
pub mod error;
pub mod utils;

pub use config::{ClusterConfig, Config, ConnectionProfile, RequeuePolicy};
pub use error::{Error, ErrorKind, ReconcileError, Result};
pub use utils::{format_duration, parse_duration};
