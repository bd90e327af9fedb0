//! # redcluster
//!
//! Forms a sharded, replicated Redis-compatible cluster out of freshly
//! started nodes that do not know each other yet.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              Controller loop                 │
//! │  (requeue delay chosen from the error kind)  │
//! └──────────────────────┬───────────────────────┘
//!                        │ one pass at a time
//! ┌──────────────────────▼───────────────────────┐
//! │                Reconciler                    │
//! │ ensure → ready → list → session → introspect │
//! │   └─ empty? plan → slots → replicas →        │
//! │             epochs → meet                    │
//! └──────────────────────┬───────────────────────┘
//!                        │ RESP over TCP
//!   ┌────────────┬───────┴────┬──────────────┐
//! ┌─▼──────┐  ┌──▼─────┐  ┌───▼────┐    ┌────▼───┐
//! │ node-0 │  │ node-1 │  │ node-2 │ .. │ node-N │
//! └────────┘  └────────┘  └────────┘    └────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! redcluster-operator run \
//!   --name orders --masters 3 --replicas 1 \
//!   --members 10.0.0.1:6379,10.0.0.2:6379,10.0.0.3:6379,10.0.0.4:6379,10.0.0.5:6379,10.0.0.6:6379
//!
//! # a single pass, exit code reflects the outcome
//! redcluster-operator reconcile --config ./redcluster.toml
//! ```

pub mod cluster;
pub mod common;
pub mod operator;

// Re-export commonly used types
pub use common::{Config, Error, ErrorKind, ReconcileError, Result};
pub use operator::{Controller, DesiredSpec, ReconcileOutcome, Reconciler};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
