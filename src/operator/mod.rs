//! Reconcile engine and its platform boundary

pub mod controller;
pub mod platform;
pub mod reconcile;

pub use controller::{Controller, Requeue};
pub use platform::{
    ClusterIdentity, DesiredSpec, Enumerator, Ensurer, MemberProcess, NoopEnsurer, ReadinessGate,
    StaticEnumerator, TcpReadinessGate,
};
pub use reconcile::{ReconcileOutcome, ReconcileStep, Reconciler};
