pub mod admission;
mod locks;

pub use admission::GroupConfig;

use std::sync::Arc;

use orc_backend::Backend;
use orc_common::audit::SharedAuditSink;
use orc_common::clock::SharedClock;
use orc_common::{Error, Result};
use orc_types::{ClusterState, OperationState, OperationType, Server, Site, SiteId, SiteOperation};

use locks::ClusterLocks;

/// Types whose creation event is emitted by the joining-agent flow instead
/// of by `create` itself (install/update/update-config/update-runtime-env,
/// and expand while it's non-terminal — which, at creation time, it always
/// is).
fn emits_create_audit(op_type: OperationType) -> bool {
    !matches!(
        op_type,
        OperationType::Install
            | OperationType::Update
            | OperationType::UpdateConfig
            | OperationType::UpdateRuntimeEnv
            | OperationType::Expand
    )
}

/// The per-cluster critical section: admits and transitions operations,
/// deriving cluster-state changes atomically with operation-state changes.
/// One `OperationGroup` serves every cluster; each cluster gets its own
/// mutex from `ClusterLocks` so unrelated clusters never block each other.
pub struct OperationGroup {
    backend: Arc<dyn Backend>,
    audit: SharedAuditSink,
    clock: SharedClock,
    locks: ClusterLocks,
    config: GroupConfig,
}

impl OperationGroup {
    pub fn new(backend: Arc<dyn Backend>, audit: SharedAuditSink, clock: SharedClock, config: GroupConfig) -> Self {
        Self {
            backend,
            audit,
            clock,
            locks: ClusterLocks::new(),
            config,
        }
    }

    /// Admits `op` if the admission rules allow it; under the same lock,
    /// persists the operation, derives and writes the in-progress cluster
    /// state, and (except for the types the joining-agent flow handles)
    /// emits an audit event.
    pub async fn create(&self, mut op: SiteOperation) -> Result<SiteOperation> {
        let _guard = self.locks.acquire(&op.domain).await;

        let site = self.load_or_seed_site(&op).await?;
        let active = self.backend.list_active_operations(&op.domain).await?;
        let last_update_plan = if op.op_type == OperationType::Update {
            match self
                .backend
                .last_operation_of_type(&op.domain, OperationType::Update)
                .await?
            {
                Some(prev) if prev.is_finished() => {
                    self.backend.get_plan(&op.domain, &prev.operation_id).await?
                }
                _ => None,
            }
        } else {
            None
        };

        admission::check_admission(
            site.state,
            site.master_count(),
            &active,
            &op,
            last_update_plan.as_ref(),
            &self.config,
        )?;

        op.updated_at = self.clock.utc_now();
        self.backend.create_operation(op.clone()).await?;

        let mut site = site;
        site.state = op.op_type.in_progress_cluster_state();
        self.backend.put_site(site).await?;

        if emits_create_audit(op.op_type) {
            self.audit.emit(
                "operation.created",
                &op.domain,
                &op.operation_id,
                &format!("{:?}", op.op_type),
            );
        }

        Ok(op)
    }

    async fn load_or_seed_site(&self, op: &SiteOperation) -> Result<Site> {
        match self.backend.get_site(&op.domain).await? {
            Some(site) => Ok(site),
            None if op.op_type == OperationType::Install => {
                Ok(Site::new(SiteId::new(op.account_id.clone(), op.domain.clone())))
            }
            None => Err(Error::NotFound(format!("site {} not found", op.domain))),
        }
    }

    /// Fails with `compare-failed` if `expected_states` is non-empty and
    /// the operation's current state is not in that set. On a terminal
    /// `new_state`, emits an audit event and recomputes cluster state: if
    /// no more active operations of `op.op_type` remain, the cluster moves
    /// to `op.cluster_state()`.
    pub async fn compare_and_swap(
        &self,
        domain: &str,
        operation_id: &str,
        expected_states: &[OperationState],
        new_state: OperationState,
    ) -> Result<SiteOperation> {
        let _guard = self.locks.acquire(domain).await;

        let mut op = self
            .backend
            .get_operation(domain, operation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {operation_id} not found")))?;

        if !expected_states.is_empty() && !expected_states.contains(&op.state) {
            return Err(Error::CompareFailed(format!(
                "operation {operation_id} is in state {:?}, expected one of {expected_states:?}",
                op.state
            )));
        }

        op.state = new_state;
        op.updated_at = self.clock.utc_now();
        self.backend.put_operation(op.clone()).await?;

        if new_state.is_finished() {
            self.audit.emit(
                "operation.finished",
                domain,
                operation_id,
                &format!("{new_state:?}"),
            );

            let remaining = self
                .backend
                .list_active_operations(domain)
                .await?
                .into_iter()
                .any(|o| o.op_type == op.op_type);

            if !remaining
                && let Some(mut site) = self.backend.get_site(domain).await?
            {
                site.state = op.cluster_state();
                self.backend.put_site(site).await?;
            }
        }

        Ok(op)
    }

    /// Adds `servers` to the cluster's server list. Refuses any add that
    /// would duplicate an existing hostname (whole call fails atomically —
    /// no partial add).
    pub async fn add_cluster_state_servers(&self, domain: &str, servers: Vec<Server>) -> Result<()> {
        let _guard = self.locks.acquire(domain).await;

        let mut site = self
            .backend
            .get_site(domain)
            .await?
            .ok_or_else(|| Error::NotFound(format!("site {domain} not found")))?;

        for server in &servers {
            if site.has_server(&server.hostname) {
                return Err(Error::AlreadyExists(format!(
                    "server with hostname {} already present",
                    server.hostname
                )));
            }
        }

        site.cluster_state_servers.extend(servers);
        self.backend.put_site(site).await
    }

    /// Idempotent: removing an absent hostname is a no-op, not an error.
    pub async fn remove_cluster_state_servers(&self, domain: &str, hostnames: &[String]) -> Result<()> {
        let _guard = self.locks.acquire(domain).await;

        let mut site = self
            .backend
            .get_site(domain)
            .await?
            .ok_or_else(|| Error::NotFound(format!("site {domain} not found")))?;

        site.cluster_state_servers
            .retain(|s| !hostnames.iter().any(|h| h == &s.hostname));
        self.backend.put_site(site).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_backend::MemBackend;
    use orc_common::audit::tracing_audit_sink;
    use orc_common::clock::system_clock;
    use orc_types::{OperationPayload, OperationType, UninstallPayload};

    fn group() -> OperationGroup {
        OperationGroup::new(
            Arc::new(MemBackend::new()),
            tracing_audit_sink(),
            system_clock(),
            GroupConfig::default(),
        )
    }

    fn install_op(domain: &str) -> SiteOperation {
        SiteOperation {
            account_id: "acct".into(),
            domain: domain.into(),
            operation_id: uuid::Uuid::new_v4().to_string(),
            op_type: OperationType::Install,
            state: OperationState::InstallInitiated,
            provisioner: "onprem".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            payload: OperationPayload::Install(Default::default()),
            force: false,
        }
    }

    #[tokio::test]
    async fn install_then_complete_moves_cluster_to_active() {
        let g = group();
        let op = g.create(install_op("example.com")).await.unwrap();

        let site = g.backend.get_site("example.com").await.unwrap().unwrap();
        assert_eq!(site.state, ClusterState::Installing);

        g.compare_and_swap(
            &op.domain,
            &op.operation_id,
            &[],
            OperationState::Completed,
        )
        .await
        .unwrap();

        let site = g.backend.get_site("example.com").await.unwrap().unwrap();
        assert_eq!(site.state, ClusterState::Active);
    }

    #[tokio::test]
    async fn second_install_is_refused() {
        let g = group();
        g.create(install_op("example.com")).await.unwrap();
        let err = g.create(install_op("example.com")).await.unwrap_err();
        assert!(err.is_compare_failed());
    }

    #[tokio::test]
    async fn cas_expected_state_mismatch_is_compare_failed() {
        let g = group();
        let op = g.create(install_op("example.com")).await.unwrap();
        let err = g
            .compare_and_swap(
                &op.domain,
                &op.operation_id,
                &[OperationState::ExpandInitiated],
                OperationState::InstallPrechecks,
            )
            .await
            .unwrap_err();
        assert!(err.is_compare_failed());
    }

    #[tokio::test]
    async fn add_cluster_state_servers_rejects_duplicate_hostnames() {
        let g = group();
        let op = g.create(install_op("example.com")).await.unwrap();
        g.compare_and_swap(&op.domain, &op.operation_id, &[], OperationState::Completed)
            .await
            .unwrap();

        g.add_cluster_state_servers(
            "example.com",
            vec![Server::new("node-1", "10.0.0.1", "node")],
        )
        .await
        .unwrap();

        let err = g
            .add_cluster_state_servers(
                "example.com",
                vec![Server::new("node-1", "10.0.0.2", "node")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn remove_cluster_state_servers_is_idempotent() {
        let g = group();
        let op = g.create(install_op("example.com")).await.unwrap();
        g.compare_and_swap(&op.domain, &op.operation_id, &[], OperationState::Completed)
            .await
            .unwrap();

        g.remove_cluster_state_servers("example.com", &["ghost".to_string()])
            .await
            .unwrap();
        g.remove_cluster_state_servers("example.com", &["ghost".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn uninstall_admitted_from_any_state() {
        let g = group();
        g.create(install_op("example.com")).await.unwrap();

        let uninstall = SiteOperation {
            account_id: "acct".into(),
            domain: "example.com".into(),
            operation_id: uuid::Uuid::new_v4().to_string(),
            op_type: OperationType::Uninstall,
            state: OperationState::UninstallInProgress,
            provisioner: "onprem".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            payload: OperationPayload::Uninstall(UninstallPayload { force: false }),
            force: false,
        };
        g.create(uninstall).await.unwrap();
    }
}
