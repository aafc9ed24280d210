use async_trait::async_trait;
use orc_common::proxy::{ProxyService, ServerLabel};
use orc_common::{Error, Result};

/// Placeholder for the real Teleport-style SSH/proxy client; that
/// collaborator is explicitly out of scope for this core and is wired in
/// by the deployment that embeds it.
pub struct UnconfiguredProxy;

#[async_trait]
impl ProxyService for UnconfiguredProxy {
    async fn get_servers(&self, _domain: &str, _labels: &[(&str, &str)]) -> Result<Vec<ServerLabel>> {
        Err(Error::Other(anyhow::anyhow!("no proxy service configured")))
    }

    async fn get_server_count(&self, _domain: &str) -> Result<usize> {
        Err(Error::Other(anyhow::anyhow!("no proxy service configured")))
    }

    async fn execute_command(
        &self,
        _domain: &str,
        _addr: &str,
        _cmd: &[String],
        _stdout: &mut dyn std::io::Write,
        _stderr: &mut dyn std::io::Write,
    ) -> Result<i32> {
        Err(Error::Other(anyhow::anyhow!("no proxy service configured")))
    }
}
