use async_trait::async_trait;

use crate::Result;

/// Outcome of a single hook invocation. `ran` is `false` when the manifest
/// doesn't define the named hook at all — absence is normal, not an error,
/// so callers check `success()` rather than matching on `ran` directly.
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    pub ran: bool,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl HookOutcome {
    pub fn success(&self) -> bool {
        !self.ran || self.exit_code == 0
    }
}

/// Named external procedures defined in the application manifest and run by
/// drivers at specific milestones: `cluster-provision`, `cluster-deprovision`,
/// `nodes-provision`, `nodes-deprovision`, `node-adding`, `node-added`,
/// `node-removing`, `node-removed`, `status`. Out of scope to implement for
/// real; this is the narrow interface drivers consume, analogous to
/// `ProxyService`.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run_hook(&self, domain: &str, name: &str) -> Result<HookOutcome>;
}
