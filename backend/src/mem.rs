use std::collections::HashMap;

use async_trait::async_trait;
use orc_common::{Error, Result};
use orc_types::{OperationPlan, ProgressEntry, ProvisioningToken, Site, SiteOperation};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    sites: HashMap<String, Site>,
    operations: HashMap<String, HashMap<String, SiteOperation>>,
    progress: HashMap<(String, String), Vec<ProgressEntry>>,
    plans: HashMap<(String, String), OperationPlan>,
    tokens: HashMap<String, ProvisioningToken>,
}

/// In-memory `Backend` used by tests and local/dev runs. All operations
/// take the single mutex, which trivially satisfies the linearizable-reads
/// requirement the real backend must provide with row-level locking.
#[derive(Default)]
pub struct MemBackend {
    state: Mutex<State>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl crate::Backend for MemBackend {
    async fn get_site(&self, domain: &str) -> Result<Option<Site>> {
        Ok(self.state.lock().await.sites.get(domain).cloned())
    }

    async fn put_site(&self, site: Site) -> Result<()> {
        self.state
            .lock()
            .await
            .sites
            .insert(site.id.domain.clone(), site);
        Ok(())
    }

    async fn delete_site(&self, domain: &str) -> Result<()> {
        self.state.lock().await.sites.remove(domain);
        Ok(())
    }

    async fn get_operation(&self, domain: &str, operation_id: &str) -> Result<Option<SiteOperation>> {
        Ok(self
            .state
            .lock()
            .await
            .operations
            .get(domain)
            .and_then(|ops| ops.get(operation_id))
            .cloned())
    }

    async fn list_operations(&self, domain: &str) -> Result<Vec<SiteOperation>> {
        Ok(self
            .state
            .lock()
            .await
            .operations
            .get(domain)
            .map(|ops| ops.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_operation(&self, op: SiteOperation) -> Result<()> {
        let mut state = self.state.lock().await;
        let bucket = state.operations.entry(op.domain.clone()).or_default();
        if bucket.contains_key(&op.operation_id) {
            return Err(Error::AlreadyExists(format!(
                "operation {} already exists",
                op.operation_id
            )));
        }
        bucket.insert(op.operation_id.clone(), op);
        Ok(())
    }

    async fn put_operation(&self, op: SiteOperation) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .operations
            .entry(op.domain.clone())
            .or_default()
            .insert(op.operation_id.clone(), op);
        Ok(())
    }

    async fn delete_operation(&self, domain: &str, operation_id: &str) -> Result<()> {
        if let Some(bucket) = self.state.lock().await.operations.get_mut(domain) {
            bucket.remove(operation_id);
        }
        Ok(())
    }

    async fn delete_operations(&self, domain: &str) -> Result<()> {
        self.state.lock().await.operations.remove(domain);
        Ok(())
    }

    async fn append_progress(&self, entry: ProgressEntry) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (entry.domain.clone(), entry.operation_id.clone());
        let entries = state.progress.entry(key).or_default();
        if let Some(last) = entries.last()
            && entry.created_at < last.created_at
        {
            return Err(Error::BadParameter(
                "progress timestamps must be monotonic".into(),
            ));
        }
        entries.push(entry);
        Ok(())
    }

    async fn list_progress(&self, domain: &str, operation_id: &str) -> Result<Vec<ProgressEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .progress
            .get(&(domain.to_string(), operation_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_plan(&self, domain: &str, operation_id: &str) -> Result<Option<OperationPlan>> {
        Ok(self
            .state
            .lock()
            .await
            .plans
            .get(&(domain.to_string(), operation_id.to_string()))
            .cloned())
    }

    async fn put_plan(&self, domain: &str, operation_id: &str, plan: OperationPlan) -> Result<()> {
        self.state
            .lock()
            .await
            .plans
            .insert((domain.to_string(), operation_id.to_string()), plan);
        Ok(())
    }

    async fn put_token(&self, token: ProvisioningToken) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tokens.entry(token.secret.clone()).or_insert(token);
        Ok(())
    }

    async fn get_token(&self, secret: &str) -> Result<Option<ProvisioningToken>> {
        Ok(self.state.lock().await.tokens.get(secret).cloned())
    }

    async fn delete_token(&self, secret: &str) -> Result<()> {
        self.state.lock().await.tokens.remove(secret);
        Ok(())
    }
}
