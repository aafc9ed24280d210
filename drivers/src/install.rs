use std::sync::Arc;
use std::time::Duration;

use orc_common::backoff::poll_until;
use orc_common::{Error, Result};
use orc_fabric::fanout::Fanout;
use orc_types::{
    AgentGroupKey, ClusterRole, InstallPayload, License, OperationPayload, OperationState,
    OperationType, ProgressState, Server, SiteOperation, TokenScope,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::OperationContext;
use crate::{run_scoped, DriverDeps};

/// Given servers with an optional pre-assigned `cluster_role`, counts
/// explicit masters, then assigns `Master` to unassigned servers while the
/// running master count stays below `max_master_nodes`, else `Node`.
pub fn assign_roles(mut servers: Vec<Server>, max_master_nodes: usize) -> Vec<Server> {
    let mut master_count = servers
        .iter()
        .filter(|s| s.cluster_role == ClusterRole::Master)
        .count();
    for server in &mut servers {
        if server.cluster_role == ClusterRole::Node && master_count < max_master_nodes {
            server.cluster_role = ClusterRole::Master;
            master_count += 1;
        }
    }
    servers
}

pub struct InstallDriver {
    deps: DriverDeps,
    fanout: Arc<Fanout>,
    license: Option<License>,
    max_master_nodes: usize,
    api_wait_timeout: Duration,
}

impl InstallDriver {
    pub fn new(
        deps: DriverDeps,
        fanout: Arc<Fanout>,
        license: Option<License>,
        max_master_nodes: usize,
        api_wait_timeout: Duration,
    ) -> Self {
        Self {
            deps,
            fanout,
            license,
            max_master_nodes,
            api_wait_timeout,
        }
    }

    /// `createInstallExpandOperation` for installs: admits the operation,
    /// mints a provisioning token, and records the agent-joining payload.
    pub async fn create(
        &self,
        account_id: &str,
        domain: &str,
        provisioner: &str,
        servers: Vec<Server>,
        fabric_addr: &str,
    ) -> Result<SiteOperation> {
        let servers = assign_roles(servers, self.max_master_nodes);
        let operation_id = Uuid::new_v4().to_string();

        let op = SiteOperation {
            account_id: account_id.to_string(),
            domain: domain.to_string(),
            operation_id: operation_id.clone(),
            op_type: OperationType::Install,
            state: OperationState::InstallInitiated,
            provisioner: provisioner.to_string(),
            created_at: self.deps.clock.utc_now(),
            updated_at: self.deps.clock.utc_now(),
            payload: OperationPayload::Install(InstallPayload {
                provisioning_token: None,
                num_servers: servers.len() as u32,
                overlay_subnet: Some("10.244.0.0/16".to_string()),
                service_subnet: Some("10.100.0.0/16".to_string()),
                agent_joining_urls: vec![format!("https://{fabric_addr}/join")],
                servers: servers.clone(),
            }),
            force: false,
        };
        let op = self.deps.group.create(op).await?;

        let token = orc_types::ProvisioningToken {
            secret: Uuid::new_v4().to_string(),
            scope: TokenScope::Install,
            account_id: account_id.to_string(),
            domain: domain.to_string(),
            operation_id: op.operation_id.clone(),
            expires_at: None,
        };
        self.deps.backend.put_token(token.clone()).await?;

        let mut op = op;
        if let OperationPayload::Install(ref mut payload) = op.payload {
            payload.provisioning_token = Some(token.secret);
        }
        self.deps.backend.put_operation(op.clone()).await?;

        self.deps
            .audit
            .emit("operation.created", domain, &op.operation_id, "Install");

        Ok(op)
    }

    /// External prechecks caller: CASes into `InstallPrechecks`, validating
    /// profile counts, license constraints, and (for cloud) region
    /// instance-type support. On failure, resets to the prior state.
    pub async fn run_prechecks(&self, domain: &str, operation_id: &str, instance_types: &[String]) -> Result<SiteOperation> {
        let op = self
            .deps
            .group
            .compare_and_swap(
                domain,
                operation_id,
                &[OperationState::InstallInitiated],
                OperationState::InstallPrechecks,
            )
            .await?;

        if let Err(e) = self.validate_prechecks(&op, instance_types) {
            self.deps
                .group
                .compare_and_swap(
                    domain,
                    operation_id,
                    &[],
                    OperationState::InstallInitiated,
                )
                .await
                .ok();
            return Err(e);
        }

        Ok(op)
    }

    fn validate_prechecks(&self, op: &SiteOperation, instance_types: &[String]) -> Result<()> {
        let OperationPayload::Install(payload) = &op.payload else {
            return Err(Error::BadParameter("not an install operation".into()));
        };

        if let Some(license) = &self.license {
            if payload.servers.len() as u32 > license.max_nodes {
                return Err(Error::PermissionDenied(format!(
                    "license allows maximum of {} nodes, requested: {}",
                    license.max_nodes,
                    payload.servers.len()
                )));
            }
            for server in &payload.servers {
                if server.num_cpu > license.max_cores {
                    return Err(Error::PermissionDenied(format!(
                        "license allows maximum of {} CPUs per host, requested: {}",
                        license.max_cores, server.num_cpu
                    )));
                }
                if let Some(instance_type) = &server.instance_type
                    && !license.allows_instance_type(instance_type)
                {
                    return Err(Error::PermissionDenied(format!(
                        "license does not allow instance type {instance_type}"
                    )));
                }
            }
        }

        for server in &payload.servers {
            if let Some(instance_type) = &server.instance_type
                && !instance_types.is_empty()
                && !instance_types.contains(instance_type)
            {
                return Err(Error::BadParameter(format!(
                    "instance type {instance_type} not supported in region"
                )));
            }
        }

        Ok(())
    }

    /// `installOperationStart`: provisioning through to the operation's
    /// terminal state.
    pub async fn start(&self, domain: &str, operation_id: &str, cancel: &CancellationToken) -> Result<SiteOperation> {
        let op = self
            .deps
            .group
            .compare_and_swap(
                domain,
                operation_id,
                &[OperationState::InstallPrechecks],
                OperationState::InstallProvisioning,
            )
            .await?;

        let OperationPayload::Install(payload) = op.payload.clone() else {
            return Err(Error::BadParameter("not an install operation".into()));
        };

        let ctx = OperationContext::open(
            self.deps.site_dir.clone(),
            domain.to_string(),
            operation_id.to_string(),
            None,
            self.deps.backend.clone(),
            self.deps.clock.clone(),
        )
        .await?;

        let domain = domain.to_string();
        let operation_id = operation_id.to_string();
        let num_servers = payload.num_servers as usize;
        let servers = payload.servers;

        run_scoped(ctx, |ctx| async move {
            let result = self
                .deploy(ctx, &domain, &operation_id, num_servers, servers, cancel)
                .await;
            if let Err(e) = &result {
                ctx.report_progress(ProgressState::Failed, 100, e.to_string()).await.ok();
                self.deps
                    .group
                    .compare_and_swap(&domain, &operation_id, &[], OperationState::Failed)
                    .await
                    .ok();
            }
            result
        })
        .await
    }

    async fn deploy(
        &self,
        ctx: &OperationContext,
        domain: &str,
        operation_id: &str,
        num_servers: usize,
        servers: Vec<Server>,
        cancel: &CancellationToken,
    ) -> Result<SiteOperation> {
        ctx.report_progress(ProgressState::InProgress, 10, "waiting for installer peer")
            .await?;
        let key = AgentGroupKey::new(domain.to_string(), operation_id.to_string());
        self.fanout.wait(&key, 1, cancel, self.api_wait_timeout).await?;

        ctx.report_progress(ProgressState::InProgress, 30, "waiting for agents to join")
            .await?;
        self.fanout.wait(&key, num_servers, cancel, self.api_wait_timeout).await?;

        let op = self
            .deps
            .group
            .compare_and_swap(
                domain,
                operation_id,
                &[OperationState::InstallProvisioning],
                OperationState::InstallDeploying,
            )
            .await?;

        ctx.report_progress(ProgressState::InProgress, 60, "instructing installer to proceed")
            .await?;

        poll_until(cancel, Duration::from_secs(5), self.api_wait_timeout, || {
            let backend = self.deps.backend.clone();
            let domain = domain.to_string();
            let operation_id = operation_id.to_string();
            async move {
                let op = backend
                    .get_operation(&domain, &operation_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("operation {operation_id} not found")))?;
                Ok(op.is_finished())
            }
        })
        .await?;

        self.deps.group.add_cluster_state_servers(domain, servers).await?;

        ctx.report_progress(ProgressState::Completed, 100, "install complete").await?;
        self.fanout.complete(&key).await.ok();

        self.deps
            .group
            .compare_and_swap(domain, operation_id, &[], OperationState::Completed)
            .await
            .or(Ok(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(hostname: &str) -> Server {
        Server::new(hostname, "10.0.0.1", "node")
    }

    #[test]
    fn assigns_masters_up_to_max_then_nodes() {
        let servers = vec![server("a"), server("b"), server("c")];
        let assigned = assign_roles(servers, 2);
        let masters = assigned.iter().filter(|s| s.cluster_role == ClusterRole::Master).count();
        assert_eq!(masters, 2);
        assert_eq!(assigned[2].cluster_role, ClusterRole::Node);
    }

    #[test]
    fn preserves_explicit_master_assignment() {
        let mut servers = vec![server("a"), server("b")];
        servers[0].cluster_role = ClusterRole::Master;
        let assigned = assign_roles(servers, 1);
        assert_eq!(assigned[0].cluster_role, ClusterRole::Master);
        assert_eq!(assigned[1].cluster_role, ClusterRole::Node);
    }
}
