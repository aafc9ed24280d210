use kube::Client;
use orc_common::{Error, Result};
use orc_types::{
    OperationPayload, OperationState, OperationType, ProgressState, SiteOperation, UpdateConfigPayload,
};
use uuid::Uuid;

use crate::configmap::ConfigMapStore;
use crate::context::OperationContext;
use crate::{run_scoped, DriverDeps};

pub const CLUSTER_CONFIG_CONFIGMAP: &str = "cluster-configuration";
pub const CLUSTER_CONFIG_KEY: &str = "spec";

pub struct UpdateConfigDriver {
    deps: DriverDeps,
    kube: Client,
    namespace: String,
}

impl UpdateConfigDriver {
    pub fn new(deps: DriverDeps, kube: Client, namespace: impl Into<String>) -> Self {
        Self {
            deps,
            kube,
            namespace: namespace.into(),
        }
    }

    pub async fn run(
        &self,
        account_id: &str,
        domain: &str,
        provisioner: &str,
        new_config: String,
    ) -> Result<SiteOperation> {
        let op = SiteOperation {
            account_id: account_id.to_string(),
            domain: domain.to_string(),
            operation_id: Uuid::new_v4().to_string(),
            op_type: OperationType::UpdateConfig,
            state: OperationState::UpdateConfigInProgress,
            provisioner: provisioner.to_string(),
            created_at: self.deps.clock.utc_now(),
            updated_at: self.deps.clock.utc_now(),
            payload: OperationPayload::UpdateConfig(UpdateConfigPayload {
                previous_config: String::new(),
                new_config: new_config.clone(),
            }),
            force: false,
        };
        let op = self.deps.group.create(op).await?;
        self.deps
            .audit
            .emit("operation.created", domain, &op.operation_id, "UpdateConfig");

        let ctx = OperationContext::open(
            self.deps.site_dir.clone(),
            domain.to_string(),
            op.operation_id.clone(),
            None,
            self.deps.backend.clone(),
            self.deps.clock.clone(),
        )
        .await?;

        let store = ConfigMapStore::new(self.kube.clone(), self.namespace.clone());
        let domain = domain.to_string();
        let operation_id = op.operation_id.clone();

        run_scoped(ctx, |ctx| async move {
            let result = self.apply(ctx, &store, &domain, &operation_id, new_config).await;
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

    async fn apply(
        &self,
        ctx: &OperationContext,
        store: &ConfigMapStore,
        domain: &str,
        operation_id: &str,
        new_config: String,
    ) -> Result<SiteOperation> {
        ctx.report_progress(ProgressState::InProgress, 20, "merging cluster configuration")
            .await?;

        let mut updates = std::collections::BTreeMap::new();
        updates.insert(CLUSTER_CONFIG_KEY.to_string(), new_config.clone());
        let previous = store
            .merge(CLUSTER_CONFIG_CONFIGMAP, updates)
            .await?
            .and_then(|m| m.get(CLUSTER_CONFIG_KEY).cloned())
            .unwrap_or_default();

        let mut op = self
            .deps
            .backend
            .get_operation(domain, operation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {operation_id} not found")))?;
        op.payload = OperationPayload::UpdateConfig(UpdateConfigPayload {
            previous_config: previous,
            new_config,
        });
        self.deps.backend.put_operation(op).await?;

        ctx.report_progress(ProgressState::Completed, 100, "cluster configuration updated")
            .await?;
        self.deps
            .group
            .compare_and_swap(domain, operation_id, &[], OperationState::Completed)
            .await
    }
}
