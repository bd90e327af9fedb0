//! In-memory cluster and platform doubles for the reconcile tests

#![allow(dead_code)]

use async_trait::async_trait;
use redcluster::cluster::{Connector, NodeClient, SlotRange, TOTAL_SLOTS};
use redcluster::common::{ConnectionProfile, Error, Result};
use redcluster::operator::{
    ClusterIdentity, DesiredSpec, Enumerator, Ensurer, MemberProcess, ReadinessGate, Reconciler,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A mutation observed by the fake cluster, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddSlots(SocketAddr, usize),
    Replicate(SocketAddr, String),
    SetConfigEpoch(SocketAddr, u64),
    Meet(SocketAddr, SocketAddr),
}

impl Call {
    pub fn phase(&self) -> u8 {
        match self {
            Call::AddSlots(..) => 0,
            Call::Replicate(..) => 1,
            Call::SetConfigEpoch(..) => 2,
            Call::Meet(..) => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeNode {
    pub id: String,
    pub addr: SocketAddr,
    pub slots: BTreeSet<u16>,
    pub master: Option<String>,
    pub epoch: u64,
    pub known: BTreeSet<SocketAddr>,
}

impl FakeNode {
    fn slot_ranges(&self) -> Vec<SlotRange> {
        let mut ranges: Vec<SlotRange> = Vec::new();
        for &slot in &self.slots {
            match ranges.last_mut() {
                Some(last) if last.end == slot => last.end = slot + 1,
                _ => ranges.push(SlotRange {
                    start: slot,
                    end: slot + 1,
                }),
            }
        }
        ranges
    }

    fn line(&self, myself: bool, show_ip: bool) -> String {
        let ip = if show_ip {
            self.addr.ip().to_string()
        } else {
            String::new()
        };
        let role = if self.master.is_some() { "slave" } else { "master" };
        let flags = if myself {
            format!("myself,{}", role)
        } else {
            role.to_string()
        };
        let mut line = format!(
            "{} {}:{}@{} {} {} 0 0 {} connected",
            self.id,
            ip,
            self.addr.port(),
            self.addr.port() + 10000,
            flags,
            self.master.as_deref().unwrap_or("-"),
            self.epoch
        );
        for range in self.slot_ranges() {
            line.push(' ');
            line.push_str(&range.to_string());
        }
        line
    }
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<SocketAddr, FakeNode>,
    calls: Vec<Call>,
    failures: HashMap<(SocketAddr, &'static str), String>,
    unreachable: HashSet<SocketAddr>,
    silent: HashSet<SocketAddr>,
    hung: HashSet<(SocketAddr, &'static str)>,
    latency: Option<Duration>,
    in_flight: usize,
    peak_in_flight: usize,
    connects: usize,
    closes: usize,
}

/// Nodes that behave like freshly started cluster-enabled servers.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

pub fn member_addr(ordinal: usize) -> SocketAddr {
    format!("10.0.0.{}:6379", ordinal + 1).parse().unwrap()
}

impl FakeCluster {
    /// `count` fresh nodes. Node ids sort in reverse of ordinals so that
    /// planning order cannot come from id order by accident.
    pub fn fresh(count: usize) -> Self {
        let cluster = Self::default();
        {
            let mut state = cluster.state.lock().unwrap();
            for ordinal in 0..count {
                let addr = member_addr(ordinal);
                state.nodes.insert(
                    addr,
                    FakeNode {
                        id: format!("{:040x}", 0xffff - ordinal),
                        addr,
                        slots: BTreeSet::new(),
                        master: None,
                        epoch: 0,
                        known: BTreeSet::new(),
                    },
                );
            }
        }
        cluster
    }

    pub fn members(&self) -> Vec<MemberProcess> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .keys()
            .enumerate()
            .map(|(i, addr)| MemberProcess {
                name: format!("orders-{}", i),
                ordinal: i as u32,
                addr: *addr,
            })
            .collect()
    }

    pub fn node(&self, ordinal: usize) -> FakeNode {
        self.state.lock().unwrap().nodes[&member_addr(ordinal)].clone()
    }

    pub fn nodes(&self) -> Vec<FakeNode> {
        self.state.lock().unwrap().nodes.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    /// Make `op` ("add_slots", "replicate", "set_config_epoch", "meet",
    /// "cluster_nodes") fail on `addr`.
    pub fn fail(&self, addr: SocketAddr, op: &'static str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((addr, op), reason.to_string());
    }

    /// Refuse connections to `addr`.
    pub fn make_unreachable(&self, addr: SocketAddr) {
        self.state.lock().unwrap().unreachable.insert(addr);
    }

    /// Accept connections to `addr` but never answer introspection.
    pub fn make_silent(&self, addr: SocketAddr) {
        self.state.lock().unwrap().silent.insert(addr);
    }

    /// Make `op` on `addr` never answer.
    pub fn hang(&self, addr: SocketAddr, op: &'static str) {
        self.state.lock().unwrap().hung.insert((addr, op));
    }

    /// Delay every node call by `latency`, so concurrent calls overlap.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    /// Most node calls observed in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }

    /// Give `addr` ownership of `slots` behind the operator's back.
    pub fn preassign(&self, addr: SocketAddr, slots: std::ops::Range<u16>) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(&addr) {
            node.slots.extend(slots);
        }
    }

    fn check(state: &State, addr: SocketAddr, op: &'static str, command: &str) -> Result<()> {
        match state.failures.get(&(addr, op)) {
            Some(reason) => Err(Error::NodeCommand {
                node: addr.to_string(),
                command: command.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn reject(addr: SocketAddr, command: &str, reason: String) -> Error {
        Error::NodeCommand {
            node: addr.to_string(),
            command: command.to_string(),
            reason,
        }
    }
}

pub struct FakeClient {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

/// Counts a node call as in progress until dropped.
struct InFlight(Arc<Mutex<State>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.in_flight -= 1;
        }
    }
}

impl FakeClient {
    async fn enter(&self, op: &'static str) -> InFlight {
        let (latency, hung) = {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            (state.latency, state.hung.contains(&(self.addr, op)))
        };
        let flight = InFlight(self.state.clone());
        if hung {
            std::future::pending::<()>().await;
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        flight
    }
}

#[async_trait]
impl NodeClient for FakeClient {
    async fn cluster_nodes(&mut self) -> Result<String> {
        let _flight = self.enter("cluster_nodes").await;
        let state = self.state.lock().unwrap();
        if state.silent.contains(&self.addr) {
            return Err(Error::Timeout(format!("CLUSTER NODES on {}", self.addr)));
        }
        FakeCluster::check(&state, self.addr, "cluster_nodes", "CLUSTER NODES")?;
        let me = &state.nodes[&self.addr];
        let joined = !me.known.is_empty();
        let mut out = me.line(true, joined);
        out.push('\n');
        for peer in &me.known {
            out.push_str(&state.nodes[peer].line(false, true));
            out.push('\n');
        }
        Ok(out)
    }

    async fn add_slots(&mut self, ranges: &[SlotRange]) -> Result<()> {
        let _flight = self.enter("add_slots").await;
        let mut state = self.state.lock().unwrap();
        FakeCluster::check(&state, self.addr, "add_slots", "CLUSTER ADDSLOTS")?;
        let count = ranges.iter().map(SlotRange::len).sum();
        state.calls.push(Call::AddSlots(self.addr, count));

        let node = state.nodes.get_mut(&self.addr).unwrap();
        for slot in ranges.iter().flat_map(SlotRange::slots) {
            if slot >= TOTAL_SLOTS || !node.slots.insert(slot) {
                return Err(FakeCluster::reject(
                    self.addr,
                    "CLUSTER ADDSLOTS",
                    format!("ERR Slot {} is already busy", slot),
                ));
            }
        }
        Ok(())
    }

    async fn replicate(&mut self, master_id: &str) -> Result<()> {
        let _flight = self.enter("replicate").await;
        let mut state = self.state.lock().unwrap();
        FakeCluster::check(&state, self.addr, "replicate", "CLUSTER REPLICATE")?;
        state
            .calls
            .push(Call::Replicate(self.addr, master_id.to_string()));

        let node = state.nodes.get_mut(&self.addr).unwrap();
        if node.id == master_id {
            return Err(FakeCluster::reject(
                self.addr,
                "CLUSTER REPLICATE",
                "ERR Can't replicate myself".into(),
            ));
        }
        if !node.slots.is_empty() {
            return Err(FakeCluster::reject(
                self.addr,
                "CLUSTER REPLICATE",
                "ERR To set a master the node must be empty".into(),
            ));
        }
        node.master = Some(master_id.to_string());
        Ok(())
    }

    async fn set_config_epoch(&mut self, epoch: u64) -> Result<()> {
        let _flight = self.enter("set_config_epoch").await;
        let mut state = self.state.lock().unwrap();
        FakeCluster::check(&state, self.addr, "set_config_epoch", "CLUSTER SET-CONFIG-EPOCH")?;
        state.calls.push(Call::SetConfigEpoch(self.addr, epoch));

        let node = state.nodes.get_mut(&self.addr).unwrap();
        if !node.known.is_empty() || node.epoch != 0 {
            return Err(FakeCluster::reject(
                self.addr,
                "CLUSTER SET-CONFIG-EPOCH",
                "ERR The user can assign a config epoch only when the node does not know any other node".into(),
            ));
        }
        if epoch == 0 {
            return Err(FakeCluster::reject(
                self.addr,
                "CLUSTER SET-CONFIG-EPOCH",
                "ERR Invalid config epoch specified: 0".into(),
            ));
        }
        node.epoch = epoch;
        Ok(())
    }

    async fn meet(&mut self, peer: SocketAddr) -> Result<()> {
        let _flight = self.enter("meet").await;
        let mut state = self.state.lock().unwrap();
        FakeCluster::check(&state, self.addr, "meet", "CLUSTER MEET")?;
        state.calls.push(Call::Meet(self.addr, peer));
        if !state.nodes.contains_key(&peer) {
            return Err(FakeCluster::reject(
                self.addr,
                "CLUSTER MEET",
                format!("ERR Invalid node address specified: {}", peer),
            ));
        }

        // Gossip converges instantly: everyone reachable from the pair
        // learns about everyone else.
        let mut component: BTreeSet<SocketAddr> = BTreeSet::from([self.addr, peer]);
        for addr in [self.addr, peer] {
            component.extend(state.nodes[&addr].known.iter().copied());
        }
        for addr in &component {
            let node = state.nodes.get_mut(addr).unwrap();
            node.known = component.iter().copied().filter(|a| a != addr).collect();
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    cluster: FakeCluster,
}

impl FakeConnector {
    pub fn new(cluster: &FakeCluster) -> Self {
        Self {
            cluster: cluster.clone(),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        addr: SocketAddr,
        _profile: &ConnectionProfile,
    ) -> Result<Box<dyn NodeClient>> {
        let mut state = self.cluster.state.lock().unwrap();
        if state.unreachable.contains(&addr) || !state.nodes.contains_key(&addr) {
            return Err(Error::ConnectionFailed(format!("{}: connection refused", addr)));
        }
        state.connects += 1;
        Ok(Box::new(FakeClient {
            addr,
            state: self.cluster.state.clone(),
        }))
    }
}

/// Ensurer, readiness gate and enumerator with scriptable failures.
#[derive(Default)]
pub struct ScriptedPlatform {
    members: Mutex<Vec<MemberProcess>>,
    pub ensure_error: Mutex<Option<String>>,
    pub not_ready: Mutex<Option<String>>,
    pub list_error: Mutex<Option<String>>,
    pub ensure_calls: Mutex<usize>,
    pub readiness_calls: Mutex<usize>,
    pub list_calls: Mutex<usize>,
}

impl ScriptedPlatform {
    pub fn new(members: Vec<MemberProcess>) -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(members),
            ..Default::default()
        })
    }

    pub fn set_not_ready(&self, reason: Option<&str>) {
        *self.not_ready.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn set_list_error(&self, reason: Option<&str>) {
        *self.list_error.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn set_ensure_error(&self, reason: Option<&str>) {
        *self.ensure_error.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn readiness_calls(&self) -> usize {
        *self.readiness_calls.lock().unwrap()
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }
}

#[async_trait]
impl Ensurer for ScriptedPlatform {
    async fn ensure(&self, _spec: &DesiredSpec) -> Result<()> {
        *self.ensure_calls.lock().unwrap() += 1;
        match self.ensure_error.lock().unwrap().clone() {
            Some(reason) => Err(Error::Platform(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReadinessGate for ScriptedPlatform {
    async fn await_ready(&self, _spec: &DesiredSpec) -> Result<()> {
        *self.readiness_calls.lock().unwrap() += 1;
        match self.not_ready.lock().unwrap().clone() {
            Some(reason) => Err(Error::NotReady(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Enumerator for ScriptedPlatform {
    async fn list_members(&self, _identity: &ClusterIdentity) -> Result<Vec<MemberProcess>> {
        *self.list_calls.lock().unwrap() += 1;
        match self.list_error.lock().unwrap().clone() {
            Some(reason) => Err(Error::Platform(reason)),
            None => Ok(self.members.lock().unwrap().clone()),
        }
    }
}

pub fn spec(masters: usize, replicas_per_master: usize) -> DesiredSpec {
    DesiredSpec {
        identity: ClusterIdentity::new("default", "orders"),
        masters,
        replicas_per_master,
    }
}

pub fn reconciler(cluster: &FakeCluster, platform: &Arc<ScriptedPlatform>) -> Reconciler {
    let profile = ConnectionProfile {
        fan_out: 4,
        ..Default::default()
    };
    reconciler_with(cluster, platform, profile)
}

pub fn reconciler_with(
    cluster: &FakeCluster,
    platform: &Arc<ScriptedPlatform>,
    profile: ConnectionProfile,
) -> Reconciler {
    Reconciler::new(
        platform.clone(),
        platform.clone(),
        platform.clone(),
        Arc::new(FakeConnector::new(cluster)),
        profile,
    )
}
