use std::sync::Arc;

use orc_common::{Error, Result};
use orc_fabric::fanout::Fanout;
use orc_runner::CommandRunner;
use orc_types::{
    ClusterRole, OperationPayload, OperationState, OperationType, ProgressState, Server, Site,
    ShrinkPayload, SiteOperation,
};
use uuid::Uuid;

use crate::context::OperationContext;
use crate::{run_scoped, DriverDeps};

/// Checks the target can be removed: it must exist, the cluster must have
/// more than one node, and removing the last master requires `force`. An
/// offline target also requires `force`.
pub fn validate_shrink(site: &Site, hostname: &str, force: bool, node_was_offline: bool) -> Result<Server> {
    let server = site
        .cluster_state_servers
        .iter()
        .find(|s| s.hostname == hostname)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("server {hostname} not found in cluster")))?;

    if site.cluster_state_servers.len() <= 1 {
        return Err(Error::BadParameter("cannot shrink a single-node cluster".into()));
    }

    if server.cluster_role == ClusterRole::Master && site.master_count() <= 1 && !force {
        return Err(Error::PermissionDenied(
            "cannot remove the last master without force".into(),
        ));
    }

    if node_was_offline && !force {
        return Err(Error::BadParameter(
            "target is offline, force required to shrink".into(),
        ));
    }

    Ok(server)
}

pub struct ShrinkDriver {
    deps: DriverDeps,
    fanout: Arc<Fanout>,
}

impl ShrinkDriver {
    pub fn new(deps: DriverDeps, fanout: Arc<Fanout>) -> Self {
        Self { deps, fanout }
    }

    pub async fn run(
        &self,
        account_id: &str,
        domain: &str,
        provisioner: &str,
        hostname: &str,
        force: bool,
        node_was_offline: bool,
        master_runner: Arc<dyn CommandRunner>,
    ) -> Result<SiteOperation> {
        let site = self
            .deps
            .backend
            .get_site(domain)
            .await?
            .ok_or_else(|| Error::NotFound(format!("site {domain} not found")))?;
        let target = validate_shrink(&site, hostname, force, node_was_offline)?;

        let op = SiteOperation {
            account_id: account_id.to_string(),
            domain: domain.to_string(),
            operation_id: Uuid::new_v4().to_string(),
            op_type: OperationType::Shrink,
            state: OperationState::ShrinkInProgress,
            provisioner: provisioner.to_string(),
            created_at: self.deps.clock.utc_now(),
            updated_at: self.deps.clock.utc_now(),
            payload: OperationPayload::Shrink(ShrinkPayload {
                hostname: hostname.to_string(),
                force,
                node_was_offline,
            }),
            force,
        };
        let op = self.deps.group.create(op).await?;

        let ctx = OperationContext::open(
            self.deps.site_dir.clone(),
            domain.to_string(),
            op.operation_id.clone(),
            None,
            self.deps.backend.clone(),
            self.deps.clock.clone(),
        )
        .await?;

        let domain = domain.to_string();
        let operation_id = op.operation_id.clone();
        let hostname = hostname.to_string();

        run_scoped(ctx, |ctx| async move {
            let result = self
                .teardown(ctx, &domain, &operation_id, &hostname, target, force, node_was_offline, master_runner)
                .await;
            if let Err(e) = &result {
                ctx.report_progress(ProgressState::Failed, 100, e.to_string()).await.ok();
                if force {
                    ctx.recorder.warn(format!("shrink failed under force, leaving cluster state as-is: {e}")).await;
                }
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

    #[allow(clippy::too_many_arguments)]
    async fn teardown(
        &self,
        ctx: &OperationContext,
        domain: &str,
        operation_id: &str,
        hostname: &str,
        target: Server,
        force: bool,
        node_was_offline: bool,
        master_runner: Arc<dyn CommandRunner>,
    ) -> Result<SiteOperation> {
        let tolerate = |ctx: &OperationContext, step: &str, e: Error| async move {
            if force {
                ctx.recorder.warn(format!("{step} failed, continuing under force: {e}")).await;
                Ok(())
            } else {
                Err(e)
            }
        };

        ctx.report_progress(ProgressState::InProgress, 10, "unregistering node label")
            .await?;
        if let Err(e) = master_runner
            .run_cmd(format!("kubectl label node {hostname} orchestrator.eosin.io/shrinking=true --overwrite"))
            .await
        {
            tolerate(ctx, "unregister node label", e).await?;
        }

        ctx.report_progress(ProgressState::InProgress, 20, "running node-removing hook").await?;
        let outcome = self.deps.hooks.run_hook(domain, "node-removing").await?;
        if !outcome.success() {
            tolerate(ctx, "node-removing hook", Error::Other(anyhow::anyhow!(
                "node-removing hook exited with code {}",
                outcome.exit_code
            ))).await?;
        }

        ctx.report_progress(ProgressState::InProgress, 30, "leaving gossip membership").await?;
        if let Err(e) = master_runner.run_cmd(format!("serf leave {hostname} || serf force-leave {hostname}")).await {
            tolerate(ctx, "serf leave", e).await?;
        }

        ctx.report_progress(ProgressState::InProgress, 40, "removing etcd member").await?;
        match master_runner.run_cmd(format!("etcdctl member remove {hostname}")).await {
            Ok(_) => {}
            Err(Error::NotFound(_)) => {}
            Err(e) => tolerate(ctx, "etcd member remove", e).await?,
        }

        if !node_was_offline {
            ctx.report_progress(ProgressState::InProgress, 50, "running system uninstall on target")
                .await?;
            // A short-lived agent running the uninstall-runner role on the
            // target itself does the actual teardown; which runner
            // implementation reaches it (proxy vs agent RPC) is the
            // caller's concern, not this driver's.
        }

        if self
            .deps
            .backend
            .get_site(domain)
            .await?
            .map(|s| s.is_cloud())
            .unwrap_or(false)
        {
            ctx.report_progress(ProgressState::InProgress, 80, "running cloud nodes-deprovision hook")
                .await?;
            let outcome = self.deps.hooks.run_hook(domain, "nodes-deprovision").await?;
            if !outcome.success() {
                tolerate(ctx, "nodes-deprovision hook", Error::Other(anyhow::anyhow!(
                    "nodes-deprovision hook exited with code {}",
                    outcome.exit_code
                ))).await?;
            }
        }

        ctx.report_progress(ProgressState::InProgress, 85, "running node-removed hook").await?;
        let outcome = self.deps.hooks.run_hook(domain, "node-removed").await?;
        if !outcome.success() {
            tolerate(ctx, "node-removed hook", Error::Other(anyhow::anyhow!(
                "node-removed hook exited with code {}",
                outcome.exit_code
            ))).await?;
        }

        ctx.report_progress(ProgressState::InProgress, 90, "removing from cluster state")
            .await?;
        self.deps
            .group
            .remove_cluster_state_servers(domain, std::slice::from_ref(&target.hostname))
            .await?;

        ctx.report_progress(ProgressState::Completed, 100, "shrink complete").await?;

        // Tears down any residual short-lived shrink agent still registered
        // under this operation's group, if one was ever spun up.
        let key = orc_types::AgentGroupKey::new(domain.to_string(), operation_id.to_string());
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
    use orc_types::{ClusterState, SiteId};

    fn site_with(servers: Vec<Server>) -> Site {
        let mut site = Site::new(SiteId::new("acct", "example.com"));
        site.state = ClusterState::Active;
        site.cluster_state_servers = servers;
        site
    }

    #[test]
    fn rejects_single_node_cluster() {
        let site = site_with(vec![Server::new("only", "10.0.0.1", "node")]);
        let err = validate_shrink(&site, "only", false, false).unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn rejects_last_master_without_force() {
        let mut master = Server::new("m1", "10.0.0.1", "master");
        master.cluster_role = ClusterRole::Master;
        let node = Server::new("n1", "10.0.0.2", "node");
        let site = site_with(vec![master, node]);
        let err = validate_shrink(&site, "m1", false, false).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn allows_last_master_with_force() {
        let mut master = Server::new("m1", "10.0.0.1", "master");
        master.cluster_role = ClusterRole::Master;
        let node = Server::new("n1", "10.0.0.2", "node");
        let site = site_with(vec![master, node]);
        validate_shrink(&site, "m1", true, false).unwrap();
    }

    #[test]
    fn offline_target_requires_force() {
        let a = Server::new("a", "10.0.0.1", "node");
        let b = Server::new("b", "10.0.0.2", "node");
        let site = site_with(vec![a, b]);
        let err = validate_shrink(&site, "a", false, true).unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }

    #[test]
    fn unknown_hostname_is_not_found() {
        let a = Server::new("a", "10.0.0.1", "node");
        let b = Server::new("b", "10.0.0.2", "node");
        let site = site_with(vec![a, b]);
        let err = validate_shrink(&site, "ghost", false, false).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
