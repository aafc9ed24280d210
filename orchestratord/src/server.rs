use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use orc_backend::MemBackend;
use orc_common::audit::tracing_audit_sink;
use orc_common::clock::system_clock;
use orc_common::shutdown::shutdown_signal;
use orc_fabric::fanout::Fanout;
use orc_fabric::proto::agent_fabric_server::AgentFabricServer;
use orc_fabric::service::AgentFabricService;
use orc_fabric::store::PeerStore;
use orc_group::{GroupConfig, OperationGroup};
use orc_types::License;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::args::ServeArgs;
use crate::hooks::NoopHookRunner;
use crate::proxy::UnconfiguredProxy;

/// Collaborators wired once at startup and handed to every driver
/// invocation; kept alive for the lifetime of the process.
pub struct Orchestrator {
    pub deps: orc_drivers::DriverDeps,
    pub fanout: Arc<Fanout>,
}

impl Orchestrator {
    pub fn new(args: &ServeArgs) -> Self {
        let backend = Arc::new(MemBackend::new());
        let clock = system_clock();
        let audit = tracing_audit_sink();
        let proxy = Arc::new(UnconfiguredProxy);

        let config = GroupConfig {
            max_expand_concurrency: args.group.max_expand_concurrency,
            max_master_nodes: args.group.max_master_nodes,
        };
        let group = Arc::new(OperationGroup::new(backend.clone(), audit.clone(), clock.clone(), config));
        let peers = Arc::new(PeerStore::new(backend.clone(), proxy, clock.clone()));
        let fanout = Arc::new(Fanout::new(peers.clone()));

        let deps = orc_drivers::DriverDeps {
            backend,
            group,
            peers,
            audit,
            clock,
            hooks: Arc::new(NoopHookRunner),
            site_dir: args.site_dir.clone(),
        };

        Self { deps, fanout }
    }

    pub fn license(args: &ServeArgs) -> Option<License> {
        match (args.license.max_nodes, args.license.max_cores) {
            (None, None) => None,
            (max_nodes, max_cores) => Some(License {
                max_nodes: max_nodes.unwrap_or(u32::MAX),
                max_cores: max_cores.unwrap_or(u32::MAX),
                allowed_instance_types: Vec::new(),
            }),
        }
    }
}

/// Runs the Agent Peer Fabric gRPC server that remote provisioning agents
/// join during install/expand/shrink. Driver invocation itself (triggering
/// install/expand/...) is a library surface consumed by whatever embeds
/// this core; no separate public API is exposed here.
pub async fn run_server(args: ServeArgs) -> Result<()> {
    let orchestrator = Orchestrator::new(&args);
    let license = Orchestrator::license(&args);

    let fabric_addr: SocketAddr = args.fabric.fabric_addr.parse()?;
    tracing::info!(%fabric_addr, "starting agent fabric server");

    let fabric_service = AgentFabricService::new(orchestrator.deps.peers.clone(), license);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    orc_common::signal_ready();

    Server::builder()
        .add_service(AgentFabricServer::new(fabric_service))
        .serve_with_shutdown(fabric_addr, async move {
            cancel.cancelled().await;
        })
        .await?;

    tracing::info!("server stopped gracefully");
    Ok(())
}
