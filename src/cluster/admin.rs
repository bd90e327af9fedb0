//! Admin session: fan-out of cluster commands over a set of nodes
//!
//! A session owns one connection per reachable member for the duration of
//! a reconcile pass. Every phase addresses its nodes concurrently, bounded
//! by the profile's `fan_out`, and fails as a unit naming the first node
//! that failed. Nothing is rolled back on failure.

use crate::cluster::client::{Connector, NodeClient};
use crate::cluster::node::{ClusterView, NodeView};
use crate::cluster::placement::TopologyPlan;
use crate::cluster::slots::SlotRange;
use crate::common::{ConnectionProfile, Error, Result};
use crate::operator::platform::MemberProcess;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One mutation addressed to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOp {
    AddSlots(Vec<SlotRange>),
    Replicate(String),
    SetConfigEpoch(u64),
    Meet(SocketAddr),
}

impl NodeOp {
    async fn apply(&self, client: &mut dyn NodeClient) -> Result<()> {
        match self {
            NodeOp::AddSlots(ranges) => client.add_slots(ranges).await,
            NodeOp::Replicate(master_id) => client.replicate(master_id).await,
            NodeOp::SetConfigEpoch(epoch) => client.set_config_epoch(*epoch).await,
            NodeOp::Meet(peer) => client.meet(*peer).await,
        }
    }
}

struct Connection {
    addr: SocketAddr,
    ordinal: u32,
    client: Box<dyn NodeClient>,
}

pub struct AdminSession {
    conns: Vec<Connection>,
    unreachable: Vec<SocketAddr>,
    fan_out: usize,
    call_timeout: Duration,
    closed: bool,
}

impl AdminSession {
    /// Connect to every member. Members that cannot be reached are left out
    /// of the session; at least one must connect.
    pub async fn open(
        members: &[MemberProcess],
        connector: &dyn Connector,
        profile: &ConnectionProfile,
    ) -> Result<Self> {
        let fan_out = profile.fan_out.max(1);
        let dials: Vec<BoxFuture<'_, (&MemberProcess, Result<Box<dyn NodeClient>>)>> = members
            .iter()
            .map(move |member| {
                async move { (member, connector.connect(member.addr, profile).await) }.boxed()
            })
            .collect();
        let attempts: Vec<_> = stream::iter(dials).buffered(fan_out).collect().await;

        let mut conns = Vec::with_capacity(members.len());
        let mut unreachable = Vec::new();
        for (member, attempt) in attempts {
            match attempt {
                Ok(client) => conns.push(Connection {
                    addr: member.addr,
                    ordinal: member.ordinal,
                    client,
                }),
                Err(e) => {
                    warn!(member = %member.name, node = %member.addr, error = %e, "Cannot connect to node");
                    unreachable.push(member.addr);
                }
            }
        }

        if conns.is_empty() {
            return Err(Error::NoReachableNodes(members.len()));
        }
        conns.sort_by_key(|c| (c.ordinal, c.addr));

        debug!(connected = conns.len(), unreachable = unreachable.len(), "Admin session opened");
        Ok(Self {
            conns,
            unreachable,
            fan_out,
            call_timeout: profile.command_timeout,
            closed: false,
        })
    }

    /// Members that could not be connected or queried.
    pub fn unreachable(&self) -> &[SocketAddr] {
        &self.unreachable
    }

    /// Query every connected node for its own view of itself.
    ///
    /// Nodes that fail to answer are left out of the view; the call fails
    /// only when no node answers.
    pub async fn introspect(&mut self) -> Result<ClusterView> {
        let call_timeout = self.call_timeout;
        let queries: Vec<BoxFuture<'_, (SocketAddr, u32, Result<String>)>> = self
            .conns
            .iter_mut()
            .map(move |conn| {
                async move {
                    let reply = tokio::time::timeout(call_timeout, conn.client.cluster_nodes())
                        .await
                        .map_err(|_| Error::Timeout(format!("CLUSTER NODES on {}", conn.addr)))
                        .and_then(|r| r);
                    (conn.addr, conn.ordinal, reply)
                }
                .boxed()
            })
            .collect();
        let replies: Vec<_> = stream::iter(queries).buffered(self.fan_out).collect().await;

        let mut view = ClusterView::new();
        for (addr, ordinal, reply) in replies {
            match reply.and_then(|out| NodeView::from_cluster_nodes(&out, addr, ordinal)) {
                Ok(node) => {
                    if let Some(prev) = view.insert(node) {
                        warn!(node = %addr, other = %prev.addr, id = %prev.id, "Two members report the same node id");
                    }
                }
                Err(e) => {
                    warn!(node = %addr, error = %e, "Excluding unreachable node from cluster view");
                    if !self.unreachable.contains(&addr) {
                        self.unreachable.push(addr);
                    }
                }
            }
        }

        if view.is_empty() {
            return Err(Error::NoReachableNodes(self.conns.len()));
        }
        Ok(view)
    }

    /// True only if no node owns slots and no node replicates another.
    pub fn is_empty(&self, view: &ClusterView) -> bool {
        view.is_unconfigured()
    }

    /// Give one node ownership of `ranges`.
    pub async fn assign_slots(&mut self, node: SocketAddr, ranges: &[SlotRange]) -> Result<()> {
        self.run_phase("assign_slots", vec![(node, NodeOp::AddSlots(ranges.to_vec()))])
            .await
    }

    /// Make one node a replica of `master_id`.
    pub async fn attach_replica(&mut self, node: SocketAddr, master_id: &str) -> Result<()> {
        self.run_phase(
            "attach_replica",
            vec![(node, NodeOp::Replicate(master_id.to_string()))],
        )
        .await
    }

    /// Assign every planned master its slots.
    pub async fn assign_all_slots(&mut self, plan: &TopologyPlan) -> Result<()> {
        let ops = plan
            .masters()
            .map(|(n, slots)| (n.addr, NodeOp::AddSlots(slots.to_vec())))
            .collect();
        self.run_phase("assign_slots", ops).await
    }

    /// Attach every planned replica to its master.
    pub async fn attach_all_replicas(&mut self, plan: &TopologyPlan) -> Result<()> {
        let ops = plan
            .replicas()
            .map(|(n, master_id)| (n.addr, NodeOp::Replicate(master_id.to_string())))
            .collect();
        self.run_phase("attach_replica", ops).await
    }

    /// Give every node its planned, cluster-unique config epoch.
    pub async fn assign_epochs(&mut self, plan: &TopologyPlan) -> Result<()> {
        let ops = plan
            .nodes()
            .iter()
            .map(|n| (n.addr, NodeOp::SetConfigEpoch(n.config_epoch)))
            .collect();
        self.run_phase("assign_epochs", ops).await
    }

    /// Introduce every node to the plan's seed node.
    pub async fn join_cluster(&mut self, plan: &TopologyPlan) -> Result<()> {
        let Some(seed) = plan.seed() else {
            return Ok(());
        };
        let ops = plan
            .nodes()
            .iter()
            .filter(|n| n.addr != seed.addr)
            .map(|n| (n.addr, NodeOp::Meet(seed.addr)))
            .collect();
        self.run_phase("join_cluster", ops).await
    }

    /// Apply `ops` concurrently. Every op runs to completion; each failure
    /// is logged, and the first one in node order is returned.
    async fn run_phase(&mut self, phase: &'static str, ops: Vec<(SocketAddr, NodeOp)>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pending: HashMap<SocketAddr, NodeOp> = HashMap::with_capacity(ops.len());
        for (addr, op) in ops {
            if !self.conns.iter().any(|c| c.addr == addr) {
                return Err(Error::UnknownNode(addr.to_string()));
            }
            pending.insert(addr, op);
        }

        let call_timeout = self.call_timeout;
        let calls: Vec<BoxFuture<'_, (SocketAddr, Result<()>)>> = self
            .conns
            .iter_mut()
            .filter_map(|c| pending.remove(&c.addr).map(|op| (c, op)))
            .map(move |(conn, op)| {
                async move {
                    let addr = conn.addr;
                    debug!(phase, node = %addr, op = ?op, "Applying");
                    let result = tokio::time::timeout(call_timeout, op.apply(conn.client.as_mut()))
                        .await
                        .map_err(|_| Error::Timeout(format!("{} on {}", phase, addr)))
                        .and_then(|r| r)
                        .map_err(|e| e.on_node(addr.to_string()));
                    (addr, result)
                }
                .boxed()
            })
            .collect();
        let count = calls.len();

        let results: Vec<_> = stream::iter(calls).buffered(self.fan_out).collect().await;

        let mut first_error = None;
        for (addr, result) in results {
            if let Err(e) = result {
                warn!(phase, node = %addr, error = %e, "Node operation failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!(phase, nodes = count, "Phase applied");
                Ok(())
            }
        }
    }

    /// Release every connection.
    pub async fn close(mut self) {
        self.closed = true;
        for conn in &mut self.conns {
            if let Err(e) = conn.client.close().await {
                debug!(node = %conn.addr, error = %e, "Error closing connection");
            }
        }
        debug!(nodes = self.conns.len(), "Admin session closed");
    }
}

impl Drop for AdminSession {
    fn drop(&mut self) {
        if !self.closed {
            // Sockets are released with the clients; only the orderly shutdown is skipped.
            warn!(nodes = self.conns.len(), "Admin session dropped without close");
        }
    }
}
