use async_trait::async_trait;
use orc_common::Result;
use orc_fabric::fanout::AgentClient;
use tokio::sync::Mutex;

use crate::{CommandRunner, RunOutput};

/// Executes commands on a joined agent via the peer fabric's `Command`
/// streaming RPC. One instance is bound to a single already-connected
/// peer; `tonic`'s generated client is `Clone` but not internally
/// synchronized for concurrent calls, so we serialize through a mutex.
pub struct AgentRunner {
    client: Mutex<AgentClient>,
}

impl AgentRunner {
    pub fn new(client: AgentClient) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }
}

#[async_trait]
impl CommandRunner for AgentRunner {
    async fn run(&self, args: Vec<String>) -> Result<RunOutput> {
        let mut client = self.client.lock().await;
        let outcome = client.exec(args, false).await?;
        Ok(RunOutput {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        })
    }

    async fn run_stream(
        &self,
        args: Vec<String>,
        stdout: &mut (dyn std::io::Write + Send),
        stderr: &mut (dyn std::io::Write + Send),
    ) -> Result<i32> {
        // The fabric's Command RPC is consumed as a stream by `exec`'s
        // caller when real-time output matters (see orc_fabric::fanout);
        // here we buffer then flush, since `CommandRunner`'s synchronous
        // writer interface can't be fed from an async stream directly.
        let output = self.run(args).await?;
        let _ = stdout.write_all(&output.stdout);
        let _ = stderr.write_all(&output.stderr);
        Ok(output.exit_code)
    }
}

/// Variant used for hooks that must not be written to the operation log
/// (secrets in output). Mirrors the fabric's `execNoLog`.
pub struct AgentRunnerNoLog {
    client: Mutex<AgentClient>,
}

impl AgentRunnerNoLog {
    pub fn new(client: AgentClient) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }
}

#[async_trait]
impl CommandRunner for AgentRunnerNoLog {
    async fn run(&self, args: Vec<String>) -> Result<RunOutput> {
        let mut client = self.client.lock().await;
        let outcome = client.exec(args, true).await?;
        Ok(RunOutput {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        })
    }

    async fn run_stream(
        &self,
        args: Vec<String>,
        _stdout: &mut (dyn std::io::Write + Send),
        _stderr: &mut (dyn std::io::Write + Send),
    ) -> Result<i32> {
        Ok(self.run(args).await?.exit_code)
    }
}
