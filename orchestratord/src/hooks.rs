use async_trait::async_trait;
use orc_common::hooks::{HookOutcome, HookRunner};
use orc_common::Result;

/// Stand-in for the real manifest hook runner: a deployment with no
/// manifest hooks configured behaves exactly like one where every hook is
/// simply undefined, so every call reports `ran: false` rather than erroring.
pub struct NoopHookRunner;

#[async_trait]
impl HookRunner for NoopHookRunner {
    async fn run_hook(&self, _domain: &str, _name: &str) -> Result<HookOutcome> {
        Ok(HookOutcome::default())
    }
}
