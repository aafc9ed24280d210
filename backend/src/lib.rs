mod mem;

pub use mem::MemBackend;

use async_trait::async_trait;
use orc_common::Result;
use orc_types::{OperationPlan, OperationType, ProgressEntry, ProvisioningToken, Site, SiteOperation};

/// Persistent-storage interface consumed by the core. The concrete,
/// production-grade implementation (row-level storage, transactions,
/// compaction, etc.) is out of scope and lives outside this workspace;
/// `MemBackend` is the in-process stand-in used for tests and local runs.
///
/// Updates are full-row replacement. Reads must be linearizable within a
/// single process — the in-memory implementation gets that for free via a
/// mutex; a real implementation would need single-row atomicity per write.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_site(&self, domain: &str) -> Result<Option<Site>>;
    async fn put_site(&self, site: Site) -> Result<()>;
    async fn delete_site(&self, domain: &str) -> Result<()>;

    async fn get_operation(&self, domain: &str, operation_id: &str) -> Result<Option<SiteOperation>>;
    async fn list_operations(&self, domain: &str) -> Result<Vec<SiteOperation>>;
    async fn list_active_operations(&self, domain: &str) -> Result<Vec<SiteOperation>> {
        Ok(self
            .list_operations(domain)
            .await?
            .into_iter()
            .filter(|op| op.is_active())
            .collect())
    }
    /// Most recent operation of the given type, ordered by `created_at`.
    async fn last_operation_of_type(
        &self,
        domain: &str,
        op_type: OperationType,
    ) -> Result<Option<SiteOperation>> {
        Ok(self
            .list_operations(domain)
            .await?
            .into_iter()
            .filter(|op| op.op_type == op_type)
            .max_by_key(|op| op.created_at))
    }
    /// Fails with `AlreadyExists` if an operation with the same id exists.
    async fn create_operation(&self, op: SiteOperation) -> Result<()>;
    /// Full-row replacement of an existing operation.
    async fn put_operation(&self, op: SiteOperation) -> Result<()>;
    /// Deletes one operation; used by garbage-collection to prune
    /// finished operations past their retention window.
    async fn delete_operation(&self, domain: &str, operation_id: &str) -> Result<()>;
    async fn delete_operations(&self, domain: &str) -> Result<()>;

    async fn append_progress(&self, entry: ProgressEntry) -> Result<()>;
    async fn list_progress(&self, domain: &str, operation_id: &str) -> Result<Vec<ProgressEntry>>;

    async fn get_plan(&self, domain: &str, operation_id: &str) -> Result<Option<OperationPlan>>;
    async fn put_plan(&self, domain: &str, operation_id: &str, plan: OperationPlan) -> Result<()>;

    /// Idempotent on the token's `secret` value.
    async fn put_token(&self, token: ProvisioningToken) -> Result<()>;
    async fn get_token(&self, secret: &str) -> Result<Option<ProvisioningToken>>;
    async fn delete_token(&self, secret: &str) -> Result<()>;
}
