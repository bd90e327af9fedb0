//! Topology planning for first-time cluster formation
//!
//! Nodes are ordered by member ordinal (then address, then id). The first
//! `masters` nodes become masters and split the slot space evenly in that
//! order; the remaining nodes become replicas, assigned round-robin so the
//! i-th replica serves master `i % masters`. Config epochs are numbered
//! from 1 in the same order.

use crate::cluster::node::{ClusterView, NodeRole, NodeView};
use crate::cluster::slots::{self, SlotRange};
use crate::common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

/// What a node is planned to become.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Master { slots: Vec<SlotRange> },
    Replica { master_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNode {
    pub id: String,
    pub addr: SocketAddr,
    pub ordinal: u32,
    pub assignment: Assignment,
    pub config_epoch: u64,
}

impl PlannedNode {
    pub fn role(&self) -> NodeRole {
        match self.assignment {
            Assignment::Master { .. } => NodeRole::Master,
            Assignment::Replica { .. } => NodeRole::Replica,
        }
    }
}

/// Slot and role assignment for every node, in planning order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    nodes: Vec<PlannedNode>,
}

impl TopologyPlan {
    pub fn nodes(&self) -> &[PlannedNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn masters(&self) -> impl Iterator<Item = (&PlannedNode, &[SlotRange])> {
        self.nodes.iter().filter_map(|n| match &n.assignment {
            Assignment::Master { slots } => Some((n, slots.as_slice())),
            Assignment::Replica { .. } => None,
        })
    }

    pub fn replicas(&self) -> impl Iterator<Item = (&PlannedNode, &str)> {
        self.nodes.iter().filter_map(|n| match &n.assignment {
            Assignment::Replica { master_id } => Some((n, master_id.as_str())),
            Assignment::Master { .. } => None,
        })
    }

    /// First node in planning order; every other node meets it on join.
    pub fn seed(&self) -> Option<&PlannedNode> {
        self.nodes.first()
    }

    /// Check full disjoint slot coverage, replica linkage and epoch uniqueness.
    pub fn validate(&self) -> Result<()> {
        slots::check_full_partition(self.masters().flat_map(|(_, s)| s.iter()))?;

        let master_ids: HashSet<&str> = self.masters().map(|(n, _)| n.id.as_str()).collect();
        for (node, master_id) in self.replicas() {
            if !master_ids.contains(master_id) {
                return Err(Error::InvalidTopology(format!(
                    "replica {} points at {}, which is not a planned master",
                    node.id, master_id
                )));
            }
        }

        let mut epochs = HashSet::new();
        for node in &self.nodes {
            if node.config_epoch == 0 || !epochs.insert(node.config_epoch) {
                return Err(Error::InvalidTopology(format!(
                    "node {} has non-unique or zero config epoch {}",
                    node.id, node.config_epoch
                )));
            }
        }
        Ok(())
    }

    /// Record the planned role, slots, referent and epoch in `view`.
    pub fn apply_to(&self, view: &mut ClusterView) {
        for planned in &self.nodes {
            if let Some(node) = view.get_mut(&planned.id) {
                node.role = planned.role();
                node.config_epoch = planned.config_epoch;
                match &planned.assignment {
                    Assignment::Master { slots } => {
                        node.slots = slots.clone();
                        node.master_referent = None;
                    }
                    Assignment::Replica { master_id } => {
                        node.slots.clear();
                        node.master_referent = Some(master_id.clone());
                    }
                }
            }
        }
    }
}

/// Builds a [`TopologyPlan`] for `masters` masters with
/// `replicas_per_master` replicas each.
#[derive(Debug, Clone, Copy)]
pub struct TopologyBuilder {
    masters: usize,
    replicas_per_master: usize,
}

impl TopologyBuilder {
    pub fn new(masters: usize, replicas_per_master: usize) -> Self {
        Self {
            masters,
            replicas_per_master,
        }
    }

    /// Nodes a plan needs: `masters * (replicas_per_master + 1)`.
    pub fn required_nodes(&self) -> Result<usize> {
        self.replicas_per_master
            .checked_add(1)
            .and_then(|per_shard| self.masters.checked_mul(per_shard))
            .ok_or_else(|| {
                Error::InvalidTopology(format!(
                    "{} masters x {} replicas overflows the node count",
                    self.masters, self.replicas_per_master
                ))
            })
    }

    /// Plan the observed nodes. Both too few and too many nodes are errors:
    /// extra members would otherwise stay outside the cluster unnoticed.
    pub fn build(&self, view: &ClusterView) -> Result<TopologyPlan> {
        let needed = self.required_nodes()?;
        if needed == 0 {
            return Err(Error::InvalidTopology("at least one master is required".into()));
        }
        let available = view.len();
        if available < needed {
            return Err(Error::InsufficientNodes { needed, available });
        }
        if available > needed {
            return Err(Error::TooManyNodes { needed, available });
        }

        let ordered: Vec<&NodeView> = view.ordered();
        let ranges = slots::split_evenly(self.masters)?;

        let mut nodes = Vec::with_capacity(needed);
        for (node, range) in ordered.iter().zip(ranges) {
            nodes.push(PlannedNode {
                id: node.id.clone(),
                addr: node.addr,
                ordinal: node.ordinal,
                assignment: Assignment::Master { slots: vec![range] },
                config_epoch: 0,
            });
        }

        let master_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        for (i, node) in ordered[self.masters..].iter().enumerate() {
            nodes.push(PlannedNode {
                id: node.id.clone(),
                addr: node.addr,
                ordinal: node.ordinal,
                assignment: Assignment::Replica {
                    master_id: master_ids[i % self.masters].clone(),
                },
                config_epoch: 0,
            });
        }

        for (epoch, node) in (1u64..).zip(nodes.iter_mut()) {
            node.config_epoch = epoch;
        }

        let plan = TopologyPlan { nodes };
        plan.validate()?;
        Ok(plan)
    }

    /// Replica count per master id; used in diagnostics.
    pub fn replica_counts(plan: &TopologyPlan) -> HashMap<&str, usize> {
        let mut counts: HashMap<&str, usize> =
            plan.masters().map(|(n, _)| (n.id.as_str(), 0)).collect();
        for (_, master_id) in plan.replicas() {
            *counts.entry(master_id).or_default() += 1;
        }
        counts
    }
}
