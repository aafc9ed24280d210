use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use orc_types::License;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::group::SystemInfo;
use crate::proto::agent_fabric_server::AgentFabric;
use crate::proto::{
    CheckDisksRequest, CheckDisksResponse, CommandChunk, CommandRequest, JoinRequest, JoinResponse,
    LeaveRequest, LeaveResponse, PingPongRequest, PingPongResponse, ServerInfoRequest,
    ServerInfoResponse, ShutdownRequest, ShutdownResponse, ValidateRequest, ValidateResponse,
};
use crate::store::PeerStore;

/// `tonic` service implementation. Thin: every real decision (authn,
/// license/hostname validation, membership) lives in `PeerStore` and
/// `AgentGroup`; this layer only translates wire messages.
pub struct AgentFabricService {
    store: Arc<PeerStore>,
    license: Option<License>,
}

impl AgentFabricService {
    pub fn new(store: Arc<PeerStore>, license: Option<License>) -> Self {
        Self { store, license }
    }
}

fn peer_addr(req: &Request<impl Sized>) -> String {
    req.remote_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".into())
}

#[tonic::async_trait]
impl AgentFabric for AgentFabricService {
    async fn join(&self, request: Request<JoinRequest>) -> Result<Response<JoinResponse>, Status> {
        let addr = peer_addr(&request);
        let req = request.into_inner();
        let system_info = req.system_info.ok_or_else(|| Status::invalid_argument("missing system_info"))?;
        let info = SystemInfo {
            hostname: system_info.hostname,
            advertise_ip: system_info.advertise_ip,
            num_cpu: system_info.num_cpu,
            memory_bytes: system_info.memory_bytes,
            os: system_info.os,
        };
        let advertise_addr = if req.addr.is_empty() { addr } else { req.addr };

        self.store
            .join(&req.token, advertise_addr, info, req.shrink_mode, self.license.as_ref())
            .await?;

        Ok(Response::new(JoinResponse { accepted: true }))
    }

    async fn leave(&self, request: Request<LeaveRequest>) -> Result<Response<LeaveResponse>, Status> {
        let req = request.into_inner();
        self.store.leave(&req.token, &req.addr).await?;
        Ok(Response::new(LeaveResponse { acknowledged: true }))
    }

    type CommandStream = Pin<Box<dyn Stream<Item = Result<CommandChunk, Status>> + Send + 'static>>;

    async fn command(
        &self,
        request: Request<CommandRequest>,
    ) -> Result<Response<Self::CommandStream>, Status> {
        let req = request.into_inner();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut child = match tokio::process::Command::new(
                req.args.first().cloned().unwrap_or_default(),
            )
            .args(req.args.iter().skip(1))
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            {
                Ok(c) => c,
                Err(e) => {
                    let _ = tx
                        .send(Err(Status::internal(format!("spawn failed: {e}"))))
                        .await;
                    return;
                }
            };

            use tokio::io::AsyncReadExt;
            let mut stdout = child.stdout.take();
            let mut stderr = child.stderr.take();

            let stdout_tx = tx.clone();
            let stdout_task = tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                if let Some(stdout) = stdout.as_mut() {
                    loop {
                        match stdout.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stdout_tx
                                    .send(Ok(CommandChunk {
                                        stdout: buf[..n].to_vec(),
                                        stderr: vec![],
                                        exit_code: None,
                                    }))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                }
            });

            let stderr_tx = tx.clone();
            let stderr_task = tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                if let Some(stderr) = stderr.as_mut() {
                    loop {
                        match stderr.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stderr_tx
                                    .send(Ok(CommandChunk {
                                        stdout: vec![],
                                        stderr: buf[..n].to_vec(),
                                        exit_code: None,
                                    }))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                }
            });

            let _ = tokio::join!(stdout_task, stderr_task);
            let status = child.wait().await.ok();
            let _ = tx
                .send(Ok(CommandChunk {
                    stdout: vec![],
                    stderr: vec![],
                    exit_code: status.and_then(|s| s.code()),
                }))
                .await;
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn validate(
        &self,
        _request: Request<ValidateRequest>,
    ) -> Result<Response<ValidateResponse>, Status> {
        // Manifest probe evaluation runs entirely on the agent side in the
        // real deployment; from the orchestrator's perspective this is a
        // pass-through RPC. No local probes to run here.
        Ok(Response::new(ValidateResponse { failing_probes: vec![] }))
    }

    async fn check_disks(
        &self,
        request: Request<CheckDisksRequest>,
    ) -> Result<Response<CheckDisksResponse>, Status> {
        let req = request.into_inner();
        let start = tokio::time::Instant::now();
        let probe_path = format!("{}/.orc-disk-probe", req.path);
        let ok = tokio::fs::write(&probe_path, b"probe").await.is_ok();
        let _ = tokio::fs::remove_file(&probe_path).await;
        Ok(Response::new(CheckDisksResponse {
            write_latency_ms: start.elapsed().as_millis() as u64,
            ok,
        }))
    }

    async fn check_ports(
        &self,
        request: Request<PingPongRequest>,
    ) -> Result<Response<PingPongResponse>, Status> {
        self.ping_pong(request, "tcp").await
    }

    async fn check_bandwidth(
        &self,
        request: Request<PingPongRequest>,
    ) -> Result<Response<PingPongResponse>, Status> {
        self.ping_pong(request, "bandwidth").await
    }

    async fn server_info(
        &self,
        _request: Request<ServerInfoRequest>,
    ) -> Result<Response<ServerInfoResponse>, Status> {
        let hostname = hostname_or_unknown();
        Ok(Response::new(ServerInfoResponse {
            info: Some(crate::proto::SystemInfo {
                hostname,
                advertise_ip: String::new(),
                num_cpu: num_cpus(),
                memory_bytes: 0,
                os: std::env::consts::OS.to_string(),
            }),
        }))
    }

    async fn shutdown(
        &self,
        request: Request<ShutdownRequest>,
    ) -> Result<Response<ShutdownResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(completed = req.completed, "agent fabric shutdown notice received");
        Ok(Response::new(ShutdownResponse {}))
    }
}

impl AgentFabricService {
    async fn ping_pong(
        &self,
        request: Request<PingPongRequest>,
        verb: &str,
    ) -> Result<Response<PingPongResponse>, Status> {
        let req = request.into_inner();
        let duration = std::time::Duration::from_millis(req.duration_ms);

        let mut listen_results = Vec::new();
        for ep in &req.listen {
            match tokio::net::TcpListener::bind(&ep.addr).await {
                Ok(listener) => {
                    let _ = tokio::time::timeout(duration, listener.accept()).await;
                    listen_results.push(crate::proto::PingPongResult {
                        endpoint: ep.addr.clone(),
                        ok: true,
                        code: 0,
                        verb: verb.to_string(),
                        message: String::new(),
                    });
                }
                Err(e) => {
                    listen_results.push(crate::proto::PingPongResult {
                        endpoint: ep.addr.clone(),
                        ok: false,
                        code: e.raw_os_error().unwrap_or(-1),
                        verb: "bind".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let mut ping_results = Vec::new();
        for ep in &req.ping {
            // Port-check waits up to twice the requested duration for the
            // listener on the other side to come up before giving up.
            match tokio::time::timeout(duration * 2, tokio::net::TcpStream::connect(&ep.addr)).await {
                Ok(Ok(_)) => ping_results.push(crate::proto::PingPongResult {
                    endpoint: ep.addr.clone(),
                    ok: true,
                    code: 0,
                    verb: "connect".to_string(),
                    message: String::new(),
                }),
                Ok(Err(e)) => ping_results.push(crate::proto::PingPongResult {
                    endpoint: ep.addr.clone(),
                    ok: false,
                    code: e.raw_os_error().unwrap_or(-1),
                    verb: "connect".to_string(),
                    message: e.to_string(),
                }),
                Err(_) => ping_results.push(crate::proto::PingPongResult {
                    endpoint: ep.addr.clone(),
                    ok: false,
                    code: libc_etimedout(),
                    verb: "connect".to_string(),
                    message: "timed out".to_string(),
                }),
            }
        }

        Ok(Response::new(PingPongResponse {
            listen_results,
            ping_results,
        }))
    }
}

fn libc_etimedout() -> i32 {
    110
}

fn hostname_or_unknown() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

mod hostname {
    pub fn get() -> std::io::Result<std::ffi::OsString> {
        Ok(std::env::var_os("HOSTNAME").unwrap_or_else(|| "unknown".into()))
    }
}
