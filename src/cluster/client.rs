//! Per-node control connections
//!
//! [`NodeClient`] is the control-plane contract the admin session needs
//! from one node. [`RespClient`] implements it over any async byte stream
//! speaking RESP; [`TcpConnector`] dials real nodes.

use crate::cluster::resp::{self, RespValue};
use crate::cluster::slots::SlotRange;
use crate::common::{ConnectionProfile, Error, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Cluster control operations against a single node.
#[async_trait]
pub trait NodeClient: Send {
    /// Raw `CLUSTER NODES` output as seen by this node.
    async fn cluster_nodes(&mut self) -> Result<String>;

    /// Give the node ownership of every slot in `ranges`.
    async fn add_slots(&mut self, ranges: &[SlotRange]) -> Result<()>;

    /// Make the node a replica of `master_id`.
    async fn replicate(&mut self, master_id: &str) -> Result<()>;

    async fn set_config_epoch(&mut self, epoch: u64) -> Result<()>;

    /// Introduce the node to the one listening at `peer`.
    async fn meet(&mut self, peer: SocketAddr) -> Result<()>;

    /// Release the connection. Called once, at session close.
    async fn close(&mut self) -> Result<()>;
}

/// Opens [`NodeClient`]s with a given connection profile.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        addr: SocketAddr,
        profile: &ConnectionProfile,
    ) -> Result<Box<dyn NodeClient>>;
}

/// RESP client over an arbitrary duplex stream.
pub struct RespClient<S> {
    addr: SocketAddr,
    stream: BufReader<S>,
    buf: BytesMut,
    command_timeout: Duration,
}

impl<S> RespClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(addr: SocketAddr, stream: S, command_timeout: Duration) -> Self {
        Self {
            addr,
            stream: BufReader::new(stream),
            buf: BytesMut::with_capacity(512),
            command_timeout,
        }
    }

    /// Send one command and wait for its reply. Error replies become
    /// [`Error::NodeCommand`] naming this node.
    pub async fn command<A: AsRef<[u8]> + Sync>(&mut self, args: &[A]) -> Result<RespValue> {
        let name = command_name(args);
        let addr = self.addr;
        let deadline = self.command_timeout;

        self.buf.clear();
        resp::encode_command(args, &mut self.buf);

        let round_trip = async {
            let stream = self.stream.get_mut();
            stream.write_all(&self.buf).await?;
            stream.flush().await?;
            resp::read_value(&mut self.stream).await
        };
        let reply = tokio::time::timeout(deadline, round_trip)
            .await
            .map_err(|_| Error::Timeout(format!("{} on {}", name, addr)))??;

        match reply {
            RespValue::Error(reason) => Err(Error::NodeCommand {
                node: addr.to_string(),
                command: name,
                reason,
            }),
            other => Ok(other),
        }
    }

    pub async fn auth(&mut self, password: &str) -> Result<()> {
        self.command(&["AUTH", password]).await?.expect_ok()
    }
}

fn command_name<A: AsRef<[u8]>>(args: &[A]) -> String {
    let words: Vec<String> = args
        .iter()
        .take(2)
        .map(|a| String::from_utf8_lossy(a.as_ref()).to_uppercase())
        .collect();
    match words.first().map(String::as_str) {
        Some("CLUSTER") => words.join(" "),
        Some(first) => first.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl<S> NodeClient for RespClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn cluster_nodes(&mut self) -> Result<String> {
        self.command(&["CLUSTER", "NODES"]).await?.into_text()
    }

    async fn add_slots(&mut self, ranges: &[SlotRange]) -> Result<()> {
        let mut args = vec!["CLUSTER".to_string(), "ADDSLOTS".to_string()];
        args.extend(ranges.iter().flat_map(SlotRange::slots).map(|s| s.to_string()));
        self.command(&args).await?.expect_ok()
    }

    async fn replicate(&mut self, master_id: &str) -> Result<()> {
        self.command(&["CLUSTER", "REPLICATE", master_id])
            .await?
            .expect_ok()
    }

    async fn set_config_epoch(&mut self, epoch: u64) -> Result<()> {
        let epoch = epoch.to_string();
        self.command(&["CLUSTER", "SET-CONFIG-EPOCH", epoch.as_str()])
            .await?
            .expect_ok()
    }

    async fn meet(&mut self, peer: SocketAddr) -> Result<()> {
        let ip = peer.ip().to_string();
        let port = peer.port().to_string();
        self.command(&["CLUSTER", "MEET", ip.as_str(), port.as_str()])
            .await?
            .expect_ok()
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}

/// Dials nodes over TCP and authenticates when the profile has a password.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        addr: SocketAddr,
        profile: &ConnectionProfile,
    ) -> Result<Box<dyn NodeClient>> {
        let stream = tokio::time::timeout(profile.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(format!("connect to {}", addr)))?
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        let mut client = RespClient::new(addr, stream, profile.command_timeout);
        if let Some(password) = &profile.password {
            client.auth(password).await?;
        }
        tracing::debug!(node = %addr, "Connected");
        Ok(Box::new(client))
    }
}
