//! Platform collaborators of the reconcile engine
//!
//! The engine does not provision processes, poll their health or list
//! them itself; it calls an [`Ensurer`], a [`ReadinessGate`] and an
//! [`Enumerator`]. The implementations here back the standalone binary,
//! where members are a fixed list of addresses.

use crate::common::{ClusterConfig, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Namespace and name of a managed cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub namespace: String,
    pub name: String,
}

impl ClusterIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Desired topology, read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredSpec {
    pub identity: ClusterIdentity,
    pub masters: usize,
    pub replicas_per_master: usize,
}

impl DesiredSpec {
    /// Member processes the spec calls for.
    pub fn total_nodes(&self) -> Result<usize> {
        self.replicas_per_master
            .checked_add(1)
            .and_then(|per_shard| self.masters.checked_mul(per_shard))
            .ok_or_else(|| {
                Error::InvalidTopology(format!(
                    "{} masters with {} replicas each is too many nodes",
                    self.masters, self.replicas_per_master
                ))
            })
    }
}

impl From<&ClusterConfig> for DesiredSpec {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            identity: ClusterIdentity::new(config.namespace.clone(), config.name.clone()),
            masters: config.masters,
            replicas_per_master: config.replicas_per_master,
        }
    }
}

/// One running process backing a prospective cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProcess {
    pub name: String,
    /// Stable position within the process group
    pub ordinal: u32,
    pub addr: SocketAddr,
}

/// Converges the process group towards the desired spec.
#[async_trait]
pub trait Ensurer: Send + Sync {
    async fn ensure(&self, spec: &DesiredSpec) -> Result<()>;
}

/// Reports whether every expected process is running.
#[async_trait]
pub trait ReadinessGate: Send + Sync {
    async fn await_ready(&self, spec: &DesiredSpec) -> Result<()>;
}

/// Lists the processes currently backing a cluster.
#[async_trait]
pub trait Enumerator: Send + Sync {
    async fn list_members(&self, identity: &ClusterIdentity) -> Result<Vec<MemberProcess>>;
}

/// Ensurer for process groups managed outside the operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnsurer;

#[async_trait]
impl Ensurer for NoopEnsurer {
    async fn ensure(&self, spec: &DesiredSpec) -> Result<()> {
        tracing::debug!(cluster = %spec.identity, "Process group is managed externally");
        Ok(())
    }
}

/// Fixed member list; list position is the ordinal.
#[derive(Debug, Clone)]
pub struct StaticEnumerator {
    identity: ClusterIdentity,
    members: Vec<MemberProcess>,
}

impl StaticEnumerator {
    pub fn new(identity: ClusterIdentity, addrs: &[SocketAddr]) -> Self {
        let members = addrs
            .iter()
            .enumerate()
            .map(|(i, addr)| MemberProcess {
                name: format!("{}-{}", identity.name, i),
                ordinal: i as u32,
                addr: *addr,
            })
            .collect();
        Self { identity, members }
    }

    pub fn members(&self) -> &[MemberProcess] {
        &self.members
    }
}

#[async_trait]
impl Enumerator for StaticEnumerator {
    async fn list_members(&self, identity: &ClusterIdentity) -> Result<Vec<MemberProcess>> {
        if *identity != self.identity {
            return Err(Error::Platform(format!("unknown cluster {}", identity)));
        }
        Ok(self.members.clone())
    }
}

/// Ready once the spec's member count is listed and every member accepts
/// a TCP connection within `timeout`.
pub struct TcpReadinessGate<E> {
    enumerator: E,
    timeout: Duration,
}

impl<E: Enumerator> TcpReadinessGate<E> {
    pub fn new(enumerator: E, timeout: Duration) -> Self {
        Self { enumerator, timeout }
    }
}

#[async_trait]
impl<E: Enumerator> ReadinessGate for TcpReadinessGate<E> {
    async fn await_ready(&self, spec: &DesiredSpec) -> Result<()> {
        let members = self.enumerator.list_members(&spec.identity).await?;
        let expected = spec.total_nodes()?;
        if members.len() != expected {
            return Err(Error::NotReady(format!(
                "{} of {} members present",
                members.len(),
                expected
            )));
        }

        let mut waiting = Vec::new();
        for member in &members {
            let probe = tokio::time::timeout(self.timeout, TcpStream::connect(member.addr)).await;
            if !matches!(probe, Ok(Ok(_))) {
                waiting.push(member.name.as_str());
            }
        }
        if !waiting.is_empty() {
            return Err(Error::NotReady(format!(
                "waiting for {}",
                waiting.join(", ")
            )));
        }
        Ok(())
    }
}
