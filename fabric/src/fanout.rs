use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use orc_common::{Error, Result};
use orc_types::AgentGroupKey;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::group::SystemInfo;
use crate::proto::agent_fabric_client::AgentFabricClient;
use crate::proto::{
    CommandRequest, JoinRequest, LeaveRequest, PingPongEndpoint, PingPongRequest, ShutdownRequest,
    ValidateRequest,
};
use crate::store::PeerStore;

/// Thin per-peer RPC client, grounded the same way as the storage tile
/// client: connect lazily, hold one `Channel` per peer, forward calls.
#[derive(Clone)]
pub struct AgentClient {
    client: AgentFabricClient<Channel>,
}

impl AgentClient {
    pub async fn connect(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let client = AgentFabricClient::connect(format!("http://{addr}"))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("connect to agent {addr}: {e}")))?;
        Ok(Self { client })
    }

    pub async fn join(&mut self, req: JoinRequest) -> Result<bool> {
        let resp = self.client.join(req).await.map_err(status_to_error)?;
        Ok(resp.into_inner().accepted)
    }

    pub async fn leave(&mut self, req: LeaveRequest) -> Result<()> {
        self.client.leave(req).await.map_err(status_to_error)?;
        Ok(())
    }

    /// Collects every streamed `CommandChunk` into a single outcome. Drivers
    /// that need live output should consume `Self::client` directly; most
    /// call sites just want the final exit code and combined buffers.
    pub async fn exec(&mut self, args: Vec<String>, no_log: bool) -> Result<ExecOutcome> {
        let mut stream = self
            .client
            .command(CommandRequest { args, no_log })
            .await
            .map_err(status_to_error)?
            .into_inner();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(status_to_error)?;
            stdout.extend_from_slice(&chunk.stdout);
            stderr.extend_from_slice(&chunk.stderr);
            if chunk.exit_code.is_some() {
                exit_code = chunk.exit_code;
            }
        }
        Ok(ExecOutcome {
            stdout,
            stderr,
            exit_code: exit_code.unwrap_or(-1),
        })
    }

    pub async fn validate(&mut self, manifest: Vec<u8>, profile: String) -> Result<Vec<String>> {
        let resp = self
            .client
            .validate(ValidateRequest { manifest, profile })
            .await
            .map_err(status_to_error)?;
        Ok(resp.into_inner().failing_probes)
    }

    pub async fn check_disks(&mut self, path: String) -> Result<(u64, bool)> {
        let resp = self
            .client
            .check_disks(crate::proto::CheckDisksRequest { path })
            .await
            .map_err(status_to_error)?
            .into_inner();
        Ok((resp.write_latency_ms, resp.ok))
    }

    pub async fn check_ports(&mut self, req: PingPongRequest) -> Result<Vec<crate::proto::PingPongResult>> {
        let resp = self.client.check_ports(req).await.map_err(status_to_error)?.into_inner();
        Ok([resp.listen_results, resp.ping_results].concat())
    }

    pub async fn check_bandwidth(
        &mut self,
        req: PingPongRequest,
    ) -> Result<Vec<crate::proto::PingPongResult>> {
        let resp = self
            .client
            .check_bandwidth(req)
            .await
            .map_err(status_to_error)?
            .into_inner();
        Ok([resp.listen_results, resp.ping_results].concat())
    }

    pub async fn shutdown(&mut self, completed: bool) -> Result<()> {
        self.client
            .shutdown(ShutdownRequest { completed })
            .await
            .map_err(status_to_error)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

fn status_to_error(status: tonic::Status) -> Error {
    use tonic::Code;
    match status.code() {
        Code::NotFound => Error::NotFound(status.message().to_string()),
        Code::AlreadyExists => Error::AlreadyExists(status.message().to_string()),
        Code::InvalidArgument => Error::BadParameter(status.message().to_string()),
        Code::PermissionDenied => Error::PermissionDenied(status.message().to_string()),
        Code::FailedPrecondition => Error::CompareFailed(status.message().to_string()),
        Code::ResourceExhausted => Error::LimitExceeded(status.message().to_string()),
        _ => Error::Other(anyhow::anyhow!("agent rpc failed: {status}")),
    }
}

/// Driver-facing fan-out over a single `AgentGroup`'s live peers: exec,
/// validate, disk/port/bandwidth checks, and group lifecycle (`wait`,
/// `abort`, `stop`, `complete`).
pub struct Fanout {
    store: Arc<PeerStore>,
}

impl Fanout {
    pub fn new(store: Arc<PeerStore>) -> Self {
        Self { store }
    }

    /// Blocks (honoring `cancel`) until at least `n` agents have joined the
    /// group, or `timeout` elapses.
    pub async fn wait(
        &self,
        key: &AgentGroupKey,
        n: usize,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<()> {
        let group = self.store.get_or_create(key.clone());
        let mut rx = group.watch_count();
        let deadline = tokio::time::Instant::now() + timeout;
        while *rx.borrow() < n {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::LimitExceeded("cancelled while waiting for agents".into()));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(Error::LimitExceeded(format!(
                        "timed out waiting for {n} agents to join, only {} joined",
                        *rx.borrow()
                    )));
                }
                res = rx.changed() => {
                    res.map_err(|_| Error::Other(anyhow::anyhow!("agent group closed while waiting")))?;
                }
            }
        }
        Ok(())
    }

    pub fn get_server_infos(&self, key: &AgentGroupKey) -> Vec<(String, SystemInfo)> {
        self.store.get_or_create(key.clone()).peers()
    }

    pub async fn exec(
        &self,
        key: &AgentGroupKey,
        args: Vec<String>,
        no_log: bool,
    ) -> Result<HashMap<String, ExecOutcome>> {
        let peers = self.store.get_or_create(key.clone()).peers();
        let mut out = HashMap::new();
        for (addr, _) in peers {
            let mut client = AgentClient::connect(&addr).await?;
            let outcome = client.exec(args.clone(), no_log).await?;
            out.insert(addr, outcome);
        }
        Ok(out)
    }

    pub async fn validate(
        &self,
        key: &AgentGroupKey,
        manifest: Vec<u8>,
        profile: String,
    ) -> Result<HashMap<String, Vec<String>>> {
        let peers = self.store.get_or_create(key.clone()).peers();
        let mut out = HashMap::new();
        for (addr, _) in peers {
            let mut client = AgentClient::connect(&addr).await?;
            let failing = client.validate(manifest.clone(), profile.clone()).await?;
            out.insert(addr, failing);
        }
        Ok(out)
    }

    pub async fn check_disks(&self, key: &AgentGroupKey, path: String) -> Result<HashMap<String, (u64, bool)>> {
        let peers = self.store.get_or_create(key.clone()).peers();
        let mut out = HashMap::new();
        for (addr, _) in peers {
            let mut client = AgentClient::connect(&addr).await?;
            out.insert(addr.clone(), client.check_disks(path.clone()).await?);
        }
        Ok(out)
    }

    /// Every participant listens on its own advertise address and pings
    /// every other participant's. The duration budget given to each
    /// participant's RPC is `duration`; connect attempts are allowed up to
    /// `2 * duration` so a slow-starting listener doesn't fail its peers.
    pub async fn check_ports(
        &self,
        key: &AgentGroupKey,
        port: u16,
        duration: Duration,
        bandwidth: bool,
    ) -> Result<HashMap<String, Vec<crate::proto::PingPongResult>>> {
        let peers = self.store.get_or_create(key.clone()).peers();
        let endpoints: Vec<PingPongEndpoint> = peers
            .iter()
            .map(|(addr, _)| PingPongEndpoint {
                network: "tcp".to_string(),
                addr: format!("{}:{port}", addr.split(':').next().unwrap_or(addr)),
            })
            .collect();

        let mut out = HashMap::new();
        for (addr, info) in &peers {
            let self_endpoint = PingPongEndpoint {
                network: "tcp".to_string(),
                addr: format!("{}:{port}", info.advertise_ip),
            };
            let others: Vec<_> = endpoints
                .iter()
                .filter(|e| e.addr != self_endpoint.addr)
                .cloned()
                .collect();
            let req = PingPongRequest {
                listen: vec![self_endpoint],
                ping: others,
                duration_ms: duration.as_millis() as u64,
            };
            let mut client = AgentClient::connect(addr).await?;
            let results = if bandwidth {
                client.check_bandwidth(req).await?
            } else {
                client.check_ports(req).await?
            };
            out.insert(addr.clone(), results);
        }
        Ok(out)
    }

    pub async fn abort(&self, key: &AgentGroupKey) -> Result<()> {
        self.teardown(key, false).await
    }

    pub async fn stop(&self, key: &AgentGroupKey) -> Result<()> {
        self.teardown(key, false).await
    }

    pub async fn complete(&self, key: &AgentGroupKey) -> Result<()> {
        self.teardown(key, true).await
    }

    async fn teardown(&self, key: &AgentGroupKey, completed: bool) -> Result<()> {
        let Some(group) = self.store.remove_group(key) else {
            return Ok(());
        };
        for (addr, _) in group.peers() {
            if let Ok(mut client) = AgentClient::connect(&addr).await {
                let _ = client.shutdown(completed).await;
            }
        }
        Ok(())
    }
}
