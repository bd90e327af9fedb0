//! Observed cluster state
//!
//! A [`NodeView`] is what one node reports about itself through
//! `CLUSTER NODES`; a [`ClusterView`] aggregates those views for one
//! reconcile pass. Neither is persisted: the live cluster is the state.

use crate::cluster::slots::{self, SlotRange};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Replica => write!(f, "replica"),
        }
    }
}

/// State of the node's cluster-bus link as it reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// One entry of `CLUSTER NODES` output.
///
/// `<id> <ip:port@cport> <flags> <master> <ping> <pong> <epoch> <link> <slot>...`
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLine {
    pub id: String,
    pub reported_addr: String,
    pub flags: Vec<String>,
    pub master: Option<String>,
    pub config_epoch: u64,
    pub link: LinkState,
    pub slots: Vec<SlotRange>,
}

impl NodeLine {
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(Error::MalformedNodeLine(line.to_string()));
        }

        let flags: Vec<String> = fields[2].split(',').map(str::to_string).collect();
        let master = match fields[3] {
            "-" | "" => None,
            id => Some(id.to_string()),
        };
        let config_epoch = fields[6]
            .parse()
            .map_err(|_| Error::MalformedNodeLine(line.to_string()))?;
        let link = match fields[7] {
            "connected" => LinkState::Connected,
            "disconnected" => LinkState::Disconnected,
            _ => return Err(Error::MalformedNodeLine(line.to_string())),
        };

        let mut slots = Vec::new();
        for token in &fields[8..] {
            if let Some(range) = SlotRange::parse(token)? {
                slots.push(range);
            }
        }

        Ok(Self {
            id: fields[0].to_string(),
            reported_addr: fields[1].to_string(),
            flags,
            master,
            config_epoch,
            link,
            slots,
        })
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_myself(&self) -> bool {
        self.has_flag("myself")
    }

    pub fn role(&self) -> NodeRole {
        if self.has_flag("slave") || self.has_flag("replica") {
            NodeRole::Replica
        } else {
            NodeRole::Master
        }
    }
}

/// The core's model of one cluster node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    /// Stable node identifier (40 hex chars on a real node)
    pub id: String,
    /// Address the operator reaches the node at
    pub addr: SocketAddr,
    /// Ordinal of the member process backing this node
    pub ordinal: u32,
    pub role: NodeRole,
    /// Node this one replicates; `None` for masters
    pub master_referent: Option<String>,
    pub slots: Vec<SlotRange>,
    pub config_epoch: u64,
    pub link: LinkState,
}

impl NodeView {
    /// Build a view from the `myself` entry of a node's `CLUSTER NODES`
    /// output. The address is the one we dialed: unjoined nodes report an
    /// empty ip.
    pub fn from_cluster_nodes(output: &str, addr: SocketAddr, ordinal: u32) -> Result<Self> {
        let mut myself = None;
        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let entry = NodeLine::parse(line)?;
            if entry.is_myself() {
                myself = Some(entry);
                break;
            }
        }
        let entry = myself.ok_or_else(|| {
            Error::MalformedNodeLine(format!("no myself entry in CLUSTER NODES from {}", addr))
        })?;

        Ok(Self {
            role: entry.role(),
            id: entry.id,
            addr,
            ordinal,
            master_referent: entry.master,
            slots: entry.slots,
            config_epoch: entry.config_epoch,
            link: entry.link,
        })
    }

    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }

    /// Whether the node carries any slot or replication configuration.
    pub fn is_configured(&self) -> bool {
        !self.slots.is_empty() || self.master_referent.is_some()
    }

    /// Ordering key used for planning: ordinal, then address, then id.
    pub fn sort_key(&self) -> (u32, SocketAddr, &str) {
        (self.ordinal, self.addr, self.id.as_str())
    }
}

/// Node id → view, built once per reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterView {
    nodes: BTreeMap<String, NodeView>,
}

impl ClusterView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeView) -> Option<NodeView> {
        self.nodes.insert(node.id.clone(), node)
    }

    pub fn get(&self, id: &str) -> Option<&NodeView> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut NodeView> {
        self.nodes.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeView> {
        self.nodes.values()
    }

    /// Nodes in planning order (see [`NodeView::sort_key`]).
    pub fn ordered(&self) -> Vec<&NodeView> {
        let mut nodes: Vec<&NodeView> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        nodes
    }

    /// True only if no node owns a slot and no node replicates another.
    ///
    /// Mixed states are not empty.
    pub fn is_unconfigured(&self) -> bool {
        self.nodes.values().all(|n| !n.is_configured())
    }

    /// Number of distinct slots owned by some node.
    pub fn coverage(&self) -> usize {
        let mut owned = vec![false; slots::TOTAL_SLOTS as usize];
        for node in self.nodes.values() {
            for slot in node.slots.iter().flat_map(SlotRange::slots) {
                owned[slot as usize] = true;
            }
        }
        owned.into_iter().filter(|o| *o).count()
    }

    pub fn masters(&self) -> impl Iterator<Item = &NodeView> {
        self.nodes.values().filter(|n| n.is_master())
    }

    pub fn replicas(&self) -> impl Iterator<Item = &NodeView> {
        self.nodes.values().filter(|n| !n.is_master())
    }
}

impl fmt::Display for ClusterView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in self.ordered() {
            let slots: Vec<String> = node.slots.iter().map(ToString::to_string).collect();
            writeln!(
                f,
                "{} {} #{} {} master={} epoch={} slots=[{}]",
                node.id,
                node.addr,
                node.ordinal,
                node.role,
                node.master_referent.as_deref().unwrap_or("-"),
                node.config_epoch,
                slots.join(",")
            )?;
        }
        Ok(())
    }
}
