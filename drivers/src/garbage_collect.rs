use chrono::Duration as ChronoDuration;
use orc_common::Result;
use orc_types::{
    OperationPayload, OperationState, OperationType, ProgressState, SiteOperation,
};
use uuid::Uuid;

use crate::context::OperationContext;
use crate::{run_scoped, DriverDeps};

/// Default retention: finished operations older than this are pruned.
pub fn default_retention() -> ChronoDuration {
    ChronoDuration::days(30)
}

pub struct GarbageCollectDriver {
    deps: DriverDeps,
    retention: ChronoDuration,
}

impl GarbageCollectDriver {
    pub fn new(deps: DriverDeps, retention: ChronoDuration) -> Self {
        Self { deps, retention }
    }

    pub async fn run(&self, account_id: &str, domain: &str, provisioner: &str) -> Result<SiteOperation> {
        let op = SiteOperation {
            account_id: account_id.to_string(),
            domain: domain.to_string(),
            operation_id: Uuid::new_v4().to_string(),
            op_type: OperationType::GarbageCollect,
            state: OperationState::GarbageCollectInProgress,
            provisioner: provisioner.to_string(),
            created_at: self.deps.clock.utc_now(),
            updated_at: self.deps.clock.utc_now(),
            payload: OperationPayload::GarbageCollect,
            force: false,
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
            let result = self.sweep(ctx, &domain, &operation_id).await;
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

    async fn sweep(
        &self,
        ctx: &OperationContext,
        domain: &str,
        operation_id: &str,
    ) -> Result<SiteOperation> {
        ctx.report_progress(ProgressState::InProgress, 10, "listing operations").await?;
        let all = self.deps.backend.list_operations(domain).await?;
        let cutoff = self.deps.clock.utc_now() - self.retention;

        let stale: Vec<_> = all
            .into_iter()
            .filter(|o| o.operation_id != operation_id)
            .filter(|o| o.is_finished() && o.updated_at < cutoff)
            .collect();

        ctx.report_progress(
            ProgressState::InProgress,
            40,
            format!("{} finished operations past retention", stale.len()),
        )
        .await?;

        for (i, stale_op) in stale.iter().enumerate() {
            self.deps
                .backend
                .delete_operation(domain, &stale_op.operation_id)
                .await?;
            ctx.recorder
                .info(format!("pruned operation {}", stale_op.operation_id))
                .await;
            let pct = 40 + ((i + 1) * 50 / stale.len().max(1)) as u8;
            ctx.report_progress(ProgressState::InProgress, pct.min(90), "pruning").await?;
        }

        ctx.report_progress(ProgressState::Completed, 100, "garbage collection complete")
            .await?;
        self.deps
            .group
            .compare_and_swap(domain, operation_id, &[], OperationState::Completed)
            .await
    }
}
