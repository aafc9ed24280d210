use std::sync::Arc;

use async_trait::async_trait;
use orc_common::Result;
use orc_common::proxy::ProxyService;

use crate::{CommandRunner, RunOutput};

/// Executes commands on a remote cluster member through the SSH/Teleport
/// proxy. One instance is bound to a single `(domain, addr)` pair.
pub struct ProxyRunner {
    proxy: Arc<dyn ProxyService>,
    domain: String,
    addr: String,
}

impl ProxyRunner {
    pub fn new(proxy: Arc<dyn ProxyService>, domain: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            proxy,
            domain: domain.into(),
            addr: addr.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for ProxyRunner {
    async fn run(&self, args: Vec<String>) -> Result<RunOutput> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit_code = self
            .proxy
            .execute_command(&self.domain, &self.addr, &args, &mut stdout, &mut stderr)
            .await?;
        Ok(RunOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    async fn run_stream(
        &self,
        args: Vec<String>,
        stdout: &mut (dyn std::io::Write + Send),
        stderr: &mut (dyn std::io::Write + Send),
    ) -> Result<i32> {
        self.proxy
            .execute_command(&self.domain, &self.addr, &args, stdout, stderr)
            .await
    }
}
