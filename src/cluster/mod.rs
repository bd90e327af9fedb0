//! Cluster data plane: observed state, topology planning and node access
//!
//! - `node`: what nodes report about themselves (`CLUSTER NODES`)
//! - `slots`: hash slot ranges over the fixed 16384-slot space
//! - `placement`: slot and replica assignment for a fresh cluster
//! - `resp` / `client`: the wire connection to one node
//! - `admin`: a session fanning commands out over many nodes

pub mod admin;
pub mod client;
pub mod node;
pub mod placement;
pub mod resp;
pub mod slots;

pub use admin::AdminSession;
pub use client::{Connector, NodeClient, RespClient, TcpConnector};
pub use node::{ClusterView, LinkState, NodeRole, NodeView};
pub use placement::{Assignment, PlannedNode, TopologyBuilder, TopologyPlan};
pub use slots::{SlotRange, TOTAL_SLOTS};
