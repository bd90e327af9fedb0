//! Configuration for the redcluster operator
//!
//! Values are layered: an optional TOML file, then `REDCLUSTER__*`
//! environment variables, then whatever the binary's flags override.

use crate::common::utils::duration_str;
use crate::common::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment prefix for overrides, e.g. `REDCLUSTER__CONNECTION__PASSWORD`.
pub const ENV_PREFIX: &str = "REDCLUSTER";

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "redcluster.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of text
    #[serde(default)]
    pub log_json: bool,

    /// How node connections are opened
    #[serde(default)]
    pub connection: ConnectionProfile,

    /// How soon passes are retried
    #[serde(default)]
    pub requeue: RequeuePolicy,

    /// Cluster to manage when running standalone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            connection: ConnectionProfile::default(),
            requeue: RequeuePolicy::default(),
            cluster: None,
        }
    }
}

/// Timeouts, credentials and concurrency used by an admin session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Deadline for establishing one TCP connection
    #[serde(default = "default_connect_timeout", with = "duration_str")]
    pub connect_timeout: Duration,

    /// Deadline for one command round-trip
    #[serde(default = "default_command_timeout", with = "duration_str")]
    pub command_timeout: Duration,

    /// Password sent with AUTH after connecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Maximum number of nodes addressed concurrently within one phase
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_command_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_fan_out() -> usize {
    16
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            command_timeout: default_command_timeout(),
            password: None,
            fan_out: default_fan_out(),
        }
    }
}

/// Maps a failure kind to the delay before the next pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequeuePolicy {
    /// After a `NotReady` failure
    #[serde(default = "default_not_ready_after", with = "duration_str")]
    pub not_ready_after: Duration,

    /// After a `Platform` or `DataPlane` failure
    #[serde(default = "default_failure_after", with = "duration_str")]
    pub failure_after: Duration,

    /// After an `Internal` failure; these need an operator, not a quick retry
    #[serde(default = "default_internal_after", with = "duration_str")]
    pub internal_after: Duration,

    /// Between successful passes
    #[serde(default = "default_resync_after", with = "duration_str")]
    pub resync_after: Duration,

    /// Consecutive loud failures before they are logged as errors
    #[serde(default = "default_escalate_after")]
    pub escalate_after: u32,
}

fn default_not_ready_after() -> Duration {
    Duration::from_secs(10)
}
fn default_failure_after() -> Duration {
    Duration::from_secs(30)
}
fn default_internal_after() -> Duration {
    Duration::from_secs(300)
}
fn default_resync_after() -> Duration {
    Duration::from_secs(30)
}
fn default_escalate_after() -> u32 {
    10
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            not_ready_after: default_not_ready_after(),
            failure_after: default_failure_after(),
            internal_after: default_internal_after(),
            resync_after: default_resync_after(),
            escalate_after: default_escalate_after(),
        }
    }
}

impl RequeuePolicy {
    pub fn delay_for(&self, kind: ErrorKind) -> Duration {
        match kind {
            ErrorKind::NotReady => self.not_ready_after,
            ErrorKind::Platform | ErrorKind::DataPlane => self.failure_after,
            ErrorKind::Internal => self.internal_after,
        }
    }
}

/// Desired shape of a standalone-managed cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub name: String,

    /// Number of masters
    pub masters: usize,

    /// Replicas per master
    #[serde(default)]
    pub replicas_per_master: usize,

    /// Member addresses; list position is the member ordinal
    #[serde(default)]
    pub members: Vec<SocketAddr>,

    /// How long the readiness gate waits for every member
    #[serde(default = "default_readiness_timeout", with = "duration_str")]
    pub readiness_timeout: Duration,
}

fn default_namespace() -> String {
    "default".to_string()
}
fn default_readiness_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Config {
    /// Load from `path` (or `redcluster.toml` if present) plus environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cluster.members")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.fan_out == 0 {
            return Err(Error::InvalidConfig("connection.fan_out must be > 0".into()));
        }
        if self.connection.connect_timeout.is_zero() || self.connection.command_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "connection timeouts must be non-zero".into(),
            ));
        }
        if let Some(cluster) = &self.cluster {
            if cluster.masters == 0 {
                return Err(Error::InvalidConfig("cluster.masters must be >= 1".into()));
            }
            if cluster.name.is_empty() {
                return Err(Error::InvalidConfig("cluster.name must be set".into()));
            }
            let nodes = cluster
                .replicas_per_master
                .checked_add(1)
                .and_then(|per_shard| cluster.masters.checked_mul(per_shard));
            if nodes.is_none() {
                return Err(Error::InvalidConfig(
                    "cluster.masters x (cluster.replicas_per_master + 1) overflows".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.fan_out, 16);
        assert_eq!(config.requeue.not_ready_after, Duration::from_secs(10));
        assert_eq!(config.requeue.resync_after, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delay_for_kind() {
        let policy = RequeuePolicy::default();
        assert_eq!(policy.delay_for(ErrorKind::NotReady), Duration::from_secs(10));
        assert_eq!(policy.delay_for(ErrorKind::DataPlane), Duration::from_secs(30));
        assert_eq!(policy.delay_for(ErrorKind::Platform), Duration::from_secs(30));
        assert_eq!(policy.delay_for(ErrorKind::Internal), Duration::from_secs(300));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[connection]
command_timeout = "750ms"
password = "s3cret"
fan_out = 4

[requeue]
not_ready_after = "2s"

[cluster]
name = "orders"
masters = 3
replicas_per_master = 1
members = ["10.0.0.1:6379", "10.0.0.2:6379"]
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.connection.command_timeout, Duration::from_millis(750));
        assert_eq!(config.connection.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.connection.password.as_deref(), Some("s3cret"));
        assert_eq!(config.connection.fan_out, 4);
        assert_eq!(config.requeue.not_ready_after, Duration::from_secs(2));

        let cluster = config.cluster.unwrap();
        assert_eq!(cluster.namespace, "default");
        assert_eq!(cluster.masters, 3);
        assert_eq!(cluster.members.len(), 2);
    }

    #[test]
    fn test_validate_rejects_zero_masters() {
        let config = Config {
            cluster: Some(ClusterConfig {
                namespace: "default".into(),
                name: "orders".into(),
                masters: 0,
                replicas_per_master: 1,
                members: vec![],
                readiness_timeout: Duration::from_secs(1),
            }),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_overflowing_shape() {
        let config = Config {
            cluster: Some(ClusterConfig {
                namespace: "default".into(),
                name: "orders".into(),
                masters: 3,
                replicas_per_master: usize::MAX,
                members: vec![],
                readiness_timeout: Duration::from_secs(1),
            }),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
