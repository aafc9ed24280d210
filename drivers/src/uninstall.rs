use orc_common::Result;
use orc_types::{OperationPayload, OperationState, OperationType, ProgressState, SiteOperation, UninstallPayload};
use uuid::Uuid;

use crate::context::OperationContext;
use crate::{run_scoped, DriverDeps};

pub struct UninstallDriver {
    deps: DriverDeps,
}

impl UninstallDriver {
    pub fn new(deps: DriverDeps) -> Self {
        Self { deps }
    }

    /// Runs against a degraded cluster only if `force` is set — admission
    /// itself allows uninstall from any state, so that check happens here,
    /// not in the group.
    pub async fn run(
        &self,
        account_id: &str,
        domain: &str,
        provisioner: &str,
        force: bool,
        is_cloud: bool,
    ) -> Result<SiteOperation> {
        let op = SiteOperation {
            account_id: account_id.to_string(),
            domain: domain.to_string(),
            operation_id: Uuid::new_v4().to_string(),
            op_type: OperationType::Uninstall,
            state: OperationState::UninstallInProgress,
            provisioner: provisioner.to_string(),
            created_at: self.deps.clock.utc_now(),
            updated_at: self.deps.clock.utc_now(),
            payload: OperationPayload::Uninstall(UninstallPayload { force }),
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

        run_scoped(ctx, |ctx| async move {
            let result = self.teardown(ctx, &domain, &operation_id, is_cloud, force).await;
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

    async fn teardown(
        &self,
        ctx: &OperationContext,
        domain: &str,
        operation_id: &str,
        is_cloud: bool,
        force: bool,
    ) -> Result<SiteOperation> {
        if is_cloud {
            ctx.report_progress(ProgressState::InProgress, 20, "running cluster-deprovision hook")
                .await?;
            let outcome = self.deps.hooks.run_hook(domain, "cluster-deprovision").await?;
            if !outcome.success() && !force {
                return Err(orc_common::Error::Other(anyhow::anyhow!(
                    "cluster-deprovision hook exited with code {}",
                    outcome.exit_code
                )));
            }
        }

        ctx.report_progress(ProgressState::InProgress, 50, "running user application uninstall hook")
            .await?;
        let outcome = self.deps.hooks.run_hook(domain, "user-app-uninstall").await?;
        if !outcome.success() && !force {
            return Err(orc_common::Error::Other(anyhow::anyhow!(
                "user application uninstall hook exited with code {}",
                outcome.exit_code
            )));
        }

        ctx.report_progress(ProgressState::InProgress, 80, "deleting site").await?;
        match self.deps.backend.delete_operations(domain).await {
            Ok(()) => {}
            Err(e) if force => {
                ctx.recorder
                    .warn(format!("non-catastrophic failure during teardown: {e}"))
                    .await;
            }
            Err(e) => return Err(e),
        }
        self.deps.backend.delete_site(domain).await?;

        ctx.report_progress(ProgressState::Completed, 100, "uninstall complete").await?;

        // `delete_operations` above removed this operation's own record
        // too, so reconstruct the terminal snapshot for the caller instead
        // of CASing a record that no longer exists.
        let mut finished = SiteOperation {
            account_id: String::new(),
            domain: domain.to_string(),
            operation_id: operation_id.to_string(),
            op_type: OperationType::Uninstall,
            state: OperationState::Completed,
            provisioner: String::new(),
            created_at: self.deps.clock.utc_now(),
            updated_at: self.deps.clock.utc_now(),
            payload: OperationPayload::Uninstall(UninstallPayload { force }),
            force,
        };
        self.deps.audit.emit("operation.finished", domain, operation_id, "Completed");
        finished.state = OperationState::Completed;
        Ok(finished)
    }
}
