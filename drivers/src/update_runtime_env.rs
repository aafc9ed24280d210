use std::collections::BTreeMap;

use kube::Client;
use orc_common::{Error, Result};
use orc_types::{
    OperationPayload, OperationState, OperationType, ProgressState, SiteOperation,
    UpdateRuntimeEnvPayload,
};
use uuid::Uuid;

use crate::configmap::ConfigMapStore;
use crate::context::OperationContext;
use crate::{run_scoped, DriverDeps};

pub const CLUSTER_ENV_CONFIGMAP: &str = "cluster-env";

/// `NO_PROXY` always ends up covering `.local`, whether or not the caller
/// supplied one. Grounded in the spec-normative request normalization.
pub fn normalize_env(mut env: BTreeMap<String, String>) -> BTreeMap<String, String> {
    match env.get_mut("NO_PROXY") {
        Some(existing) => {
            if !existing.split(',').any(|p| p.trim() == ".local") {
                if !existing.is_empty() {
                    existing.push(',');
                }
                existing.push_str(".local");
            }
        }
        None => {
            env.insert("NO_PROXY".to_string(), ".local".to_string());
        }
    }
    env
}

pub struct UpdateRuntimeEnvDriver {
    deps: DriverDeps,
    kube: Client,
    namespace: String,
}

impl UpdateRuntimeEnvDriver {
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
        requested_env: BTreeMap<String, String>,
    ) -> Result<SiteOperation> {
        let new_env = normalize_env(requested_env);

        let op = SiteOperation {
            account_id: account_id.to_string(),
            domain: domain.to_string(),
            operation_id: Uuid::new_v4().to_string(),
            op_type: OperationType::UpdateRuntimeEnv,
            state: OperationState::UpdateRuntimeEnvInProgress,
            provisioner: provisioner.to_string(),
            created_at: self.deps.clock.utc_now(),
            updated_at: self.deps.clock.utc_now(),
            payload: OperationPayload::UpdateRuntimeEnv(UpdateRuntimeEnvPayload {
                previous_env: BTreeMap::new(),
                new_env: new_env.clone(),
            }),
            force: false,
        };
        let op = self.deps.group.create(op).await?;
        self.deps
            .audit
            .emit("operation.created", domain, &op.operation_id, "UpdateRuntimeEnv");

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
            let result = self.apply(ctx, &store, &domain, &operation_id, new_env).await;
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
        new_env: BTreeMap<String, String>,
    ) -> Result<SiteOperation> {
        ctx.report_progress(ProgressState::InProgress, 10, "merging runtime environment")
            .await?;
        let previous = store
            .merge(CLUSTER_ENV_CONFIGMAP, new_env.clone())
            .await?
            .unwrap_or_default();

        let mut op = self
            .deps
            .backend
            .get_operation(domain, operation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {operation_id} not found")))?;
        op.payload = OperationPayload::UpdateRuntimeEnv(UpdateRuntimeEnvPayload {
            previous_env: previous,
            new_env,
        });
        self.deps.backend.put_operation(op).await?;

        ctx.report_progress(ProgressState::Completed, 100, "runtime environment updated")
            .await?;
        self.deps
            .group
            .compare_and_swap(domain, operation_id, &[], OperationState::Completed)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_proxy_defaults_to_local() {
        let env = normalize_env(BTreeMap::new());
        assert_eq!(env.get("NO_PROXY"), Some(&".local".to_string()));
    }

    #[test]
    fn no_proxy_appends_local_when_missing() {
        let mut requested = BTreeMap::new();
        requested.insert("NO_PROXY".to_string(), "10.0.0.0/8".to_string());
        let env = normalize_env(requested);
        assert_eq!(env.get("NO_PROXY"), Some(&"10.0.0.0/8,.local".to_string()));
    }

    #[test]
    fn no_proxy_left_alone_when_already_covered() {
        let mut requested = BTreeMap::new();
        requested.insert("NO_PROXY".to_string(), "10.0.0.0/8,.local".to_string());
        let env = normalize_env(requested);
        assert_eq!(env.get("NO_PROXY"), Some(&"10.0.0.0/8,.local".to_string()));
    }
}
