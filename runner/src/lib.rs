pub mod agent;
pub mod local;
pub mod proxy;
pub mod retry;

use async_trait::async_trait;
use orc_common::Result;

/// Output of a buffered (non-streaming) run.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capability interface satisfied by the three command back-ends (local
/// process, SSH-like proxy, agent RPC) plus the retry decorator. Every
/// implementation takes args by value so callers never hold a borrow
/// across an await point.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs to completion, buffering stdout/stderr.
    async fn run(&self, args: Vec<String>) -> Result<RunOutput>;

    /// Runs to completion, streaming stdout/stderr into the given sinks as
    /// they arrive instead of buffering.
    async fn run_stream(
        &self,
        args: Vec<String>,
        stdout: &mut (dyn std::io::Write + Send),
        stderr: &mut (dyn std::io::Write + Send),
    ) -> Result<i32>;

    /// Runs a single shell-interpreted command string (`sh -c`).
    async fn run_cmd(&self, cmd: String) -> Result<RunOutput> {
        self.run(vec!["sh".to_string(), "-c".to_string(), cmd]).await
    }
}
