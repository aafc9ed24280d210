pub mod configmap;
pub mod context;
pub mod expand;
pub mod garbage_collect;
pub mod install;
pub mod shrink;
pub mod uninstall;
pub mod update_config;
pub mod update_runtime_env;
pub mod upgrade;
pub mod version;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use orc_backend::Backend;
use orc_common::audit::SharedAuditSink;
use orc_common::clock::SharedClock;
use orc_common::hooks::HookRunner;
use orc_common::Result;
use orc_fabric::store::PeerStore;
use orc_group::OperationGroup;

use context::OperationContext;

/// Collaborators shared by every driver. Cloned cheaply (everything inside
/// is already an `Arc`); constructed once by the binary and handed to each
/// driver invocation.
#[derive(Clone)]
pub struct DriverDeps {
    pub backend: Arc<dyn Backend>,
    pub group: Arc<OperationGroup>,
    pub peers: Arc<PeerStore>,
    pub audit: SharedAuditSink,
    pub clock: SharedClock,
    pub hooks: Arc<dyn HookRunner>,
    pub site_dir: String,
}

/// Runs `body` with access to `ctx`, guaranteeing `ctx.close().await` on
/// every exit path including panic-unwind — the async equivalent of a
/// scoped `defer`/`finally`, since `Drop` cannot await.
pub async fn run_scoped<T, F, Fut>(ctx: OperationContext, body: F) -> Result<T>
where
    F: FnOnce(&OperationContext) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let result = AssertUnwindSafe(body(&ctx)).catch_unwind().await;
    ctx.close().await;
    match result {
        Ok(r) => r,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
