use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use orc_common::backoff::poll_until;
use orc_common::{Error, Result};
use orc_fabric::fanout::Fanout;
use orc_types::{
    AgentGroupKey, ClusterRole, ExpandPayload, ExpandPolicy, License, OperationPayload,
    OperationState, OperationType, Profile, ProgressState, Server, SiteOperation, TokenScope,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::OperationContext;
use crate::{run_scoped, DriverDeps};

/// Assigns `Master` to new servers while `current_master_count` stays below
/// `max_master_nodes`, else `Node`. Unlike install's role assignment, the
/// running count starts from the cluster's existing masters, not zero.
pub fn assign_expand_roles(
    mut servers: Vec<Server>,
    mut current_master_count: usize,
    max_master_nodes: usize,
) -> Vec<Server> {
    for server in &mut servers {
        if server.cluster_role == ClusterRole::Node && current_master_count < max_master_nodes {
            server.cluster_role = ClusterRole::Master;
            current_master_count += 1;
        }
    }
    servers
}

/// Validates an expand request against the application manifest's profiles
/// and (for cloud, fixed-instance profiles) the instance type recorded at
/// install time for that role.
pub fn validate_expand(
    servers: &[Server],
    profiles: &[Profile],
    is_cloud: bool,
    is_on_prem: bool,
    recorded_instance_types: &HashMap<String, String>,
) -> Result<()> {
    if is_on_prem && servers.len() != 1 {
        return Err(Error::BadParameter(
            "on-prem expand accepts exactly one server per request".into(),
        ));
    }

    for server in servers {
        let profile = profiles
            .iter()
            .find(|p| p.name == server.role)
            .ok_or_else(|| Error::BadParameter(format!("unknown profile {}", server.role)))?;

        if profile.expand_policy == ExpandPolicy::Fixed {
            return Err(Error::PermissionDenied(format!(
                "profile {} does not allow expansion",
                profile.name
            )));
        }

        if is_cloud
            && let Some(recorded) = recorded_instance_types.get(&server.role)
            && server.instance_type.as_deref() != Some(recorded.as_str())
        {
            return Err(Error::BadParameter(format!(
                "profile {} is fixed to instance type {recorded}",
                profile.name
            )));
        }
    }

    Ok(())
}

pub struct ExpandDriver {
    deps: DriverDeps,
    fanout: Arc<Fanout>,
    license: Option<License>,
    max_master_nodes: usize,
    api_wait_timeout: Duration,
}

impl ExpandDriver {
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

    pub async fn create(
        &self,
        account_id: &str,
        domain: &str,
        provisioner: &str,
        servers: Vec<Server>,
        current_master_count: usize,
        fabric_addr: &str,
    ) -> Result<SiteOperation> {
        if let Some(license) = &self.license {
            for server in &servers {
                if server.num_cpu > license.max_cores {
                    return Err(Error::PermissionDenied(format!(
                        "license allows maximum of {} CPUs per host, requested: {}",
                        license.max_cores, server.num_cpu
                    )));
                }
            }
        }

        let servers = assign_expand_roles(servers, current_master_count, self.max_master_nodes);
        let adds_master = servers.iter().any(|s| s.cluster_role == ClusterRole::Master);
        let operation_id = Uuid::new_v4().to_string();

        let op = SiteOperation {
            account_id: account_id.to_string(),
            domain: domain.to_string(),
            operation_id: operation_id.clone(),
            op_type: OperationType::Expand,
            state: OperationState::ExpandInitiated,
            provisioner: provisioner.to_string(),
            created_at: self.deps.clock.utc_now(),
            updated_at: self.deps.clock.utc_now(),
            payload: OperationPayload::Expand(ExpandPayload {
                provisioning_token: None,
                num_servers: servers.len() as u32,
                adds_master,
                servers: servers.clone(),
            }),
            force: false,
        };
        let op = self.deps.group.create(op).await?;

        let token = orc_types::ProvisioningToken {
            secret: Uuid::new_v4().to_string(),
            scope: TokenScope::Expand,
            account_id: account_id.to_string(),
            domain: domain.to_string(),
            operation_id: op.operation_id.clone(),
            expires_at: Some(self.deps.clock.utc_now() + chrono::Duration::hours(1)),
        };
        self.deps.backend.put_token(token.clone()).await?;

        let mut op = op;
        if let OperationPayload::Expand(ref mut payload) = op.payload {
            payload.provisioning_token = Some(token.secret);
        }
        self.deps.backend.put_operation(op.clone()).await?;

        self.deps
            .audit
            .emit("operation.created", domain, &op.operation_id, "Expand");

        let _ = fabric_addr;
        Ok(op)
    }

    pub async fn run_prechecks(&self, domain: &str, operation_id: &str) -> Result<SiteOperation> {
        self.deps
            .group
            .compare_and_swap(
                domain,
                operation_id,
                &[OperationState::ExpandInitiated],
                OperationState::ExpandPrechecks,
            )
            .await
    }

    pub async fn start(&self, domain: &str, operation_id: &str, cancel: &CancellationToken) -> Result<SiteOperation> {
        let op = self
            .deps
            .group
            .compare_and_swap(
                domain,
                operation_id,
                &[OperationState::ExpandPrechecks],
                OperationState::ExpandProvisioning,
            )
            .await?;

        let OperationPayload::Expand(payload) = op.payload.clone() else {
            return Err(Error::BadParameter("not an expand operation".into()));
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
            let result = self.provision(ctx, &domain, &operation_id, num_servers, servers, cancel).await;
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

    async fn provision(
        &self,
        ctx: &OperationContext,
        domain: &str,
        operation_id: &str,
        num_servers: usize,
        servers: Vec<Server>,
        cancel: &CancellationToken,
    ) -> Result<SiteOperation> {
        ctx.report_progress(ProgressState::InProgress, 10, "waiting for agents to join")
            .await?;
        let key = AgentGroupKey::new(domain.to_string(), operation_id.to_string());
        self.fanout.wait(&key, num_servers, cancel, self.api_wait_timeout).await?;

        // Cluster state gains the new servers before any node-specific
        // provisioning hook runs, so a crash mid-expand still leaves the
        // server list consistent with what agents were told to join.
        self.deps.group.add_cluster_state_servers(domain, servers).await?;

        ctx.report_progress(ProgressState::InProgress, 50, "waiting for node registration")
            .await?;
        poll_until(cancel, Duration::from_secs(5), self.api_wait_timeout, || {
            let backend = self.deps.backend.clone();
            let domain = domain.to_string();
            async move {
                let site = backend
                    .get_site(&domain)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("site {domain} not found")))?;
                Ok(!site.cluster_state_servers.is_empty())
            }
        })
        .await?;

        self.deps
            .group
            .compare_and_swap(domain, operation_id, &[], OperationState::ExpandReady)
            .await?;

        ctx.report_progress(ProgressState::Completed, 100, "expand complete").await?;
        self.fanout.complete(&key).await.ok();

        self.deps
            .group
            .compare_and_swap(domain, operation_id, &[], OperationState::Completed)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, policy: ExpandPolicy) -> Profile {
        Profile {
            name: name.to_string(),
            count: None,
            expand_policy: policy,
            is_master: false,
        }
    }

    #[test]
    fn on_prem_rejects_multiple_servers() {
        let servers = vec![Server::new("a", "10.0.0.1", "node"), Server::new("b", "10.0.0.2", "node")];
        let profiles = vec![profile("node", ExpandPolicy::Unlimited)];
        let err = validate_expand(&servers, &profiles, false, true, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn fixed_profile_cannot_expand() {
        let servers = vec![Server::new("a", "10.0.0.1", "node")];
        let profiles = vec![profile("node", ExpandPolicy::Fixed)];
        let err = validate_expand(&servers, &profiles, false, false, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn cloud_fixed_instance_mismatch_rejected() {
        let mut server = Server::new("a", "10.0.0.1", "node");
        server.instance_type = Some("m5.large".to_string());
        let profiles = vec![profile("node", ExpandPolicy::Unlimited)];
        let mut recorded = HashMap::new();
        recorded.insert("node".to_string(), "m5.xlarge".to_string());
        let err = validate_expand(&[server], &profiles, true, false, &recorded).unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn assign_expand_roles_respects_existing_master_count() {
        let servers = vec![Server::new("a", "10.0.0.1", "node"), Server::new("b", "10.0.0.2", "node")];
        let assigned = assign_expand_roles(servers, 2, 3);
        let masters = assigned.iter().filter(|s| s.cluster_role == ClusterRole::Master).count();
        assert_eq!(masters, 1);
    }
}
