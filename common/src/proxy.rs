use async_trait::async_trait;

use crate::Result;

#[derive(Debug, Clone)]
pub struct ServerLabel {
    pub hostname: String,
    pub advertise_ip: String,
    pub service_role: String,
}

/// The Teleport-style SSH/proxy service used to reach nodes once they are
/// part of the cluster. Out of scope to implement; this is the narrow
/// interface the fabric (hostname-collision checks) and the SSH command
/// runner consume.
#[async_trait]
pub trait ProxyService: Send + Sync {
    async fn get_servers(&self, domain: &str, labels: &[(&str, &str)]) -> Result<Vec<ServerLabel>>;
    async fn get_server_count(&self, domain: &str) -> Result<usize>;
    async fn execute_command(
        &self,
        domain: &str,
        addr: &str,
        cmd: &[String],
        stdout: &mut dyn std::io::Write,
        stderr: &mut dyn std::io::Write,
    ) -> Result<i32>;
}
