//! One reconcile pass for a cluster
//!
//! The pass runs ensure → readiness → enumerate → open session →
//! introspect → emptiness check, and bootstraps only an empty cluster:
//! slots, then replica links, then config epochs, then join. Each phase
//! completes on every node before the next starts. The session is closed
//! on every exit once opened.

use crate::cluster::admin::AdminSession;
use crate::cluster::client::Connector;
use crate::cluster::placement::TopologyBuilder;
use crate::cluster::slots::TOTAL_SLOTS;
use crate::common::{ConnectionProfile, ErrorKind, ReconcileError};
use crate::operator::platform::{DesiredSpec, Ensurer, Enumerator, ReadinessGate};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// How a successful pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The cluster already had slots or replica links; nothing was changed.
    AlreadyInitialized { nodes: usize, covered_slots: usize },
    /// The cluster was formed during this pass.
    Bootstrapped { masters: usize, replicas: usize },
    /// Shutdown was requested between two steps.
    Cancelled { step: ReconcileStep },
}

/// Steps of a pass, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    EnsureTopology,
    AwaitReadiness,
    Enumerate,
    OpenSession,
    Introspect,
    BuildPlan,
    AssignSlots,
    AttachReplicas,
    AssignEpochs,
    JoinCluster,
}

impl ReconcileStep {
    /// Operation name used when classifying this step's failure.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStep::EnsureTopology => "ensure_topology",
            ReconcileStep::AwaitReadiness => "await_readiness",
            ReconcileStep::Enumerate => "list_members",
            ReconcileStep::OpenSession => "open_session",
            ReconcileStep::Introspect => "introspect",
            ReconcileStep::BuildPlan => "build_plan",
            ReconcileStep::AssignSlots => "assign_slots",
            ReconcileStep::AttachReplicas => "attach_replicas",
            ReconcileStep::AssignEpochs => "assign_epochs",
            ReconcileStep::JoinCluster => "join_cluster",
        }
    }
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type PassResult = std::result::Result<ReconcileOutcome, ReconcileError>;

/// Runs reconcile passes against one set of collaborators.
#[derive(Clone)]
pub struct Reconciler {
    ensurer: Arc<dyn Ensurer>,
    readiness: Arc<dyn ReadinessGate>,
    enumerator: Arc<dyn Enumerator>,
    connector: Arc<dyn Connector>,
    profile: ConnectionProfile,
}

macro_rules! bail_if_cancelled {
    ($cancel:expr, $step:expr) => {
        if $cancel.is_cancelled() {
            info!(step = %$step, "Reconcile cancelled");
            return Ok(ReconcileOutcome::Cancelled { step: $step });
        }
    };
}

impl Reconciler {
    pub fn new(
        ensurer: Arc<dyn Ensurer>,
        readiness: Arc<dyn ReadinessGate>,
        enumerator: Arc<dyn Enumerator>,
        connector: Arc<dyn Connector>,
        profile: ConnectionProfile,
    ) -> Self {
        Self {
            ensurer,
            readiness,
            enumerator,
            connector,
            profile,
        }
    }

    /// Run one pass for `spec`. The caller serializes passes per cluster.
    pub async fn reconcile(&self, spec: &DesiredSpec, cancel: &CancellationToken) -> PassResult {
        let span = info_span!(
            "reconcile",
            namespace = %spec.identity.namespace,
            name = %spec.identity.name
        );
        self.run(spec, cancel).instrument(span).await
    }

    async fn run(&self, spec: &DesiredSpec, cancel: &CancellationToken) -> PassResult {
        bail_if_cancelled!(cancel, ReconcileStep::EnsureTopology);
        self.ensurer
            .ensure(spec)
            .await
            .map_err(|e| ErrorKind::Platform.wrap(e, ReconcileStep::EnsureTopology.as_str()))?;

        bail_if_cancelled!(cancel, ReconcileStep::AwaitReadiness);
        self.readiness
            .await_ready(spec)
            .await
            .map_err(|e| ErrorKind::NotReady.wrap(e, ReconcileStep::AwaitReadiness.as_str()))?;

        bail_if_cancelled!(cancel, ReconcileStep::Enumerate);
        let members = self
            .enumerator
            .list_members(&spec.identity)
            .await
            .map_err(|e| ErrorKind::Platform.wrap(e, ReconcileStep::Enumerate.as_str()))?;
        debug!(members = members.len(), "Listed member processes");

        bail_if_cancelled!(cancel, ReconcileStep::OpenSession);
        let mut session = AdminSession::open(&members, self.connector.as_ref(), &self.profile)
            .await
            .map_err(|e| ErrorKind::DataPlane.wrap(e, ReconcileStep::OpenSession.as_str()))?;

        let result = self.converge(&mut session, spec, cancel).await;
        session.close().await;
        result
    }

    async fn converge(
        &self,
        session: &mut AdminSession,
        spec: &DesiredSpec,
        cancel: &CancellationToken,
    ) -> PassResult {
        bail_if_cancelled!(cancel, ReconcileStep::Introspect);
        let mut view = session
            .introspect()
            .await
            .map_err(|e| ErrorKind::DataPlane.wrap(e, ReconcileStep::Introspect.as_str()))?;
        info!("Cluster nodes:\n{}", view);
        if !session.unreachable().is_empty() {
            warn!(unreachable = ?session.unreachable(), "Some members are not part of the view");
        }

        if !session.is_empty(&view) {
            let covered_slots = view.coverage();
            if covered_slots < TOTAL_SLOTS as usize {
                // An interrupted bootstrap looks like this too; it is not repaired here.
                warn!(
                    covered_slots,
                    total = TOTAL_SLOTS,
                    "Cluster is initialized but slot coverage is incomplete"
                );
            }
            debug!(nodes = view.len(), "Cluster already initialized");
            return Ok(ReconcileOutcome::AlreadyInitialized {
                nodes: view.len(),
                covered_slots,
            });
        }

        bail_if_cancelled!(cancel, ReconcileStep::BuildPlan);
        let plan = TopologyBuilder::new(spec.masters, spec.replicas_per_master)
            .build(&view)
            .map_err(|e| ErrorKind::Internal.wrap(e, ReconcileStep::BuildPlan.as_str()))?;
        info!(
            masters = spec.masters,
            replicas_per_master = spec.replicas_per_master,
            "Cluster is empty, bootstrapping"
        );
        debug!(replicas = ?TopologyBuilder::replica_counts(&plan), "Replicas per master");

        bail_if_cancelled!(cancel, ReconcileStep::AssignSlots);
        session
            .assign_all_slots(&plan)
            .await
            .map_err(|e| ErrorKind::DataPlane.wrap(e, ReconcileStep::AssignSlots.as_str()))?;

        bail_if_cancelled!(cancel, ReconcileStep::AttachReplicas);
        session
            .attach_all_replicas(&plan)
            .await
            .map_err(|e| ErrorKind::DataPlane.wrap(e, ReconcileStep::AttachReplicas.as_str()))?;
        info!(">>> Nodes configuration updated");

        bail_if_cancelled!(cancel, ReconcileStep::AssignEpochs);
        info!(">>> Assign a different config epoch to each node");
        session
            .assign_epochs(&plan)
            .await
            .map_err(|e| ErrorKind::DataPlane.wrap(e, ReconcileStep::AssignEpochs.as_str()))?;

        bail_if_cancelled!(cancel, ReconcileStep::JoinCluster);
        info!(">>> Sending CLUSTER MEET messages to join the cluster");
        session
            .join_cluster(&plan)
            .await
            .map_err(|e| ErrorKind::DataPlane.wrap(e, ReconcileStep::JoinCluster.as_str()))?;

        plan.apply_to(&mut view);
        debug!("Planned cluster:\n{}", view);

        Ok(ReconcileOutcome::Bootstrapped {
            masters: plan.masters().count(),
            replicas: plan.replicas().count(),
        })
    }
}
