use async_trait::async_trait;
use orc_common::{Error, Result};

use crate::{CommandRunner, RunOutput};

/// Executes commands as a local child process. Used for hooks and
/// installer-side steps that run on the orchestrator host itself.
pub struct LocalRunner;

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, args: Vec<String>) -> Result<RunOutput> {
        let Some((program, rest)) = args.split_first() else {
            return Err(Error::BadParameter("empty command".into()));
        };
        let output = tokio::process::Command::new(program)
            .args(rest)
            .output()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("spawn {program}: {e}")))?;
        Ok(RunOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn run_stream(
        &self,
        args: Vec<String>,
        stdout: &mut (dyn std::io::Write + Send),
        stderr: &mut (dyn std::io::Write + Send),
    ) -> Result<i32> {
        let output = self.run(args).await?;
        stdout
            .write_all(&output.stdout)
            .map_err(|e| Error::Other(anyhow::anyhow!(e)))?;
        stderr
            .write_all(&output.stderr)
            .map_err(|e| Error::Other(anyhow::anyhow!(e)))?;
        Ok(output.exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_true_and_false() {
        let runner = LocalRunner;
        let ok = runner.run(vec!["true".into()]).await.unwrap();
        assert!(ok.success());
        let fail = runner.run(vec!["false".into()]).await.unwrap();
        assert!(!fail.success());
    }

    #[tokio::test]
    async fn run_cmd_uses_shell() {
        let runner = LocalRunner;
        let out = runner.run_cmd("echo hi".into()).await.unwrap();
        assert_eq!(out.stdout, b"hi\n");
    }
}
