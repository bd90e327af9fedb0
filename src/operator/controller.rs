//! Control loop around the reconciler
//!
//! This is the only place a failure kind turns into a retry delay.
//! Passes for one cluster never overlap: the loop awaits each pass before
//! scheduling the next.

use crate::common::{ErrorKind, RequeuePolicy};
use crate::operator::platform::DesiredSpec;
use crate::operator::reconcile::{ReconcileOutcome, Reconciler};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the loop does after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Run again after the delay.
    After(Duration),
    /// The loop was cancelled.
    Stop,
}

pub struct Controller {
    reconciler: Reconciler,
    policy: RequeuePolicy,
    consecutive_failures: u32,
}

impl Controller {
    pub fn new(reconciler: Reconciler, policy: RequeuePolicy) -> Self {
        Self {
            reconciler,
            policy,
            consecutive_failures: 0,
        }
    }

    /// Loud failures seen since the last successful pass.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run one pass and decide when the next one should happen.
    pub async fn run_once(&mut self, spec: &DesiredSpec, cancel: &CancellationToken) -> Requeue {
        match self.reconciler.reconcile(spec, cancel).await {
            Ok(ReconcileOutcome::Cancelled { .. }) => Requeue::Stop,
            Ok(outcome) => {
                self.consecutive_failures = 0;
                match outcome {
                    ReconcileOutcome::Bootstrapped { masters, replicas } => {
                        info!(cluster = %spec.identity, masters, replicas, "Cluster bootstrapped");
                    }
                    other => debug!(cluster = %spec.identity, outcome = ?other, "Reconcile pass done"),
                }
                Requeue::After(self.policy.resync_after)
            }
            Err(e) => {
                let delay = e.requeue_after(&self.policy);
                let kind = e.kind();
                if kind.is_benign() {
                    info!(cluster = %spec.identity, error = %e, "Cluster not ready, requeueing in {:?}", delay);
                    return Requeue::After(delay);
                }

                self.consecutive_failures += 1;
                if kind == ErrorKind::Internal {
                    error!(
                        cluster = %spec.identity,
                        error = %e,
                        "Reconcile cannot converge without operator attention"
                    );
                } else if self.consecutive_failures >= self.policy.escalate_after {
                    error!(
                        cluster = %spec.identity,
                        %kind,
                        failures = self.consecutive_failures,
                        error = %e,
                        "Reconcile keeps failing"
                    );
                } else {
                    warn!(cluster = %spec.identity, %kind, error = %e, "Reconcile failed, requeueing in {:?}", delay);
                }
                Requeue::After(delay)
            }
        }
    }

    /// Reconcile until `cancel` fires.
    pub async fn run(mut self, spec: DesiredSpec, cancel: CancellationToken) {
        info!(cluster = %spec.identity, "Starting control loop");
        loop {
            let delay = match self.run_once(&spec, &cancel).await {
                Requeue::Stop => break,
                Requeue::After(delay) => delay,
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!(cluster = %spec.identity, "Control loop stopped");
    }
}
