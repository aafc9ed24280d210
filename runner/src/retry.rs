use async_trait::async_trait;
use orc_common::backoff::Backoff;
use orc_common::{Error, Result};
use tokio_util::sync::CancellationToken;

use crate::{CommandRunner, RunOutput};

/// Wraps any `CommandRunner` with bounded exponential-backoff retry.
/// Transients (connection errors, etcd member-list flakes wrapped as
/// `Error::Other`) are retried; admission/validation-style errors are not.
pub struct RetryingRunner<R> {
    inner: R,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl<R: CommandRunner> RetryingRunner<R> {
    pub fn new(inner: R, backoff: Backoff, cancel: CancellationToken) -> Self {
        Self {
            inner,
            backoff,
            cancel,
        }
    }

    fn should_retry(err: &Error) -> bool {
        matches!(err, Error::Other(_) | Error::LimitExceeded(_))
    }
}

#[async_trait]
impl<R: CommandRunner + Send + Sync> CommandRunner for RetryingRunner<R> {
    async fn run(&self, args: Vec<String>) -> Result<RunOutput> {
        self.backoff
            .retry(&self.cancel, Self::should_retry, || self.inner.run(args.clone()))
            .await
    }

    async fn run_stream(
        &self,
        args: Vec<String>,
        stdout: &mut (dyn std::io::Write + Send),
        stderr: &mut (dyn std::io::Write + Send),
    ) -> Result<i32> {
        // Streaming output can't be safely replayed on retry without
        // duplicating partial output, so this decorator only retries the
        // buffered `run` path; streamed calls run once.
        self.inner.run_stream(args, stdout, stderr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct FlakyRunner {
        attempts: Arc<AtomicUsize>,
        fail_times: usize,
    }

    #[async_trait]
    impl CommandRunner for FlakyRunner {
        async fn run(&self, _args: Vec<String>) -> Result<RunOutput> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(Error::Other(anyhow::anyhow!("transient")));
            }
            Ok(RunOutput {
                exit_code: 0,
                ..Default::default()
            })
        }

        async fn run_stream(
            &self,
            _args: Vec<String>,
            _stdout: &mut (dyn std::io::Write + Send),
            _stderr: &mut (dyn std::io::Write + Send),
        ) -> Result<i32> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let runner = RetryingRunner::new(
            FlakyRunner {
                attempts: attempts.clone(),
                fail_times: 2,
            },
            Backoff {
                base: Duration::from_millis(1),
                cap: Duration::from_millis(5),
                max_elapsed: Some(Duration::from_secs(5)),
            },
            CancellationToken::new(),
        );
        let out = runner.run(vec!["x".into()]).await.unwrap();
        assert!(out.success());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bad_parameter_is_not_retried() {
        struct AlwaysBad;
        #[async_trait]
        impl CommandRunner for AlwaysBad {
            async fn run(&self, _args: Vec<String>) -> Result<RunOutput> {
                Err(Error::BadParameter("nope".into()))
            }
            async fn run_stream(
                &self,
                _args: Vec<String>,
                _stdout: &mut (dyn std::io::Write + Send),
                _stderr: &mut (dyn std::io::Write + Send),
            ) -> Result<i32> {
                unimplemented!()
            }
        }
        let runner = RetryingRunner::new(AlwaysBad, Backoff::default(), CancellationToken::new());
        let err = runner.run(vec![]).await.unwrap_err();
        assert!(matches!(err, Error::BadParameter(_)));
    }
}
