use std::path::PathBuf;
use std::sync::Arc;

use orc_backend::Backend;
use orc_common::clock::SharedClock;
use orc_common::{Error, Result};
use orc_types::{ProgressEntry, ProgressState};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Formats timestamped `[INFO]/[WARN]/[ERROR]` lines and mirrors them to
/// both the operation log file and the structured logger. Composed into
/// `OperationContext`; every `Record*` call routes through here.
pub struct Recorder {
    operation_id: String,
    log: Mutex<Option<File>>,
    install_log: Mutex<Option<File>>,
    clock: SharedClock,
}

impl Recorder {
    async fn open(path: &PathBuf) -> Result<File> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Other(anyhow::anyhow!("create {}: {e}", parent.display())))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("open {}: {e}", path.display())))
    }

    pub async fn new(
        operation_id: String,
        log_path: PathBuf,
        install_log_path: Option<PathBuf>,
        clock: SharedClock,
    ) -> Result<Self> {
        let log = Self::open(&log_path).await?;
        let install_log = match install_log_path {
            Some(p) => Some(Self::open(&p).await?),
            None => None,
        };
        Ok(Self {
            operation_id,
            log: Mutex::new(Some(log)),
            install_log: Mutex::new(install_log),
            clock,
        })
    }

    async fn write_line(&self, level: &str, message: &str) {
        let line = format!("[{}] {} {}\n", level, self.clock.utc_now().to_rfc3339(), message);
        if let Some(log) = self.log.lock().await.as_mut() {
            let _ = log.write_all(line.as_bytes()).await;
        }
        if let Some(log) = self.install_log.lock().await.as_mut() {
            let _ = log.write_all(line.as_bytes()).await;
        }
    }

    pub async fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(operation_id = %self.operation_id, "{message}");
        self.write_line("INFO", message).await;
    }

    pub async fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!(operation_id = %self.operation_id, "{message}");
        self.write_line("WARN", message).await;
    }

    pub async fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!(operation_id = %self.operation_id, "{message}");
        self.write_line("ERROR", message).await;
    }

    /// Flushes and drops the underlying file handles. Called on every exit
    /// path, including panic-unwind, via `OperationContext`'s `Drop` impl.
    pub async fn close(&self) {
        if let Some(mut log) = self.log.lock().await.take() {
            let _ = log.flush().await;
        }
        if let Some(mut log) = self.install_log.lock().await.take() {
            let _ = log.flush().await;
        }
    }
}

/// Scoped acquisition of per-operation resources. Constructed at the start
/// of a driver run; callers must run the body under a guard that calls
/// `close().await` on every exit path, including panic-unwind, via
/// `scopeguard`-style `Drop` (see `drivers::run_scoped`).
pub struct OperationContext {
    pub domain: String,
    pub operation_id: String,
    pub recorder: Recorder,
    backend: Arc<dyn Backend>,
    clock: SharedClock,
    pub provisioned_servers: Mutex<Vec<String>>,
    pub servers_to_remove: Mutex<Vec<String>>,
}

impl OperationContext {
    pub async fn open(
        site_dir: impl AsRef<str>,
        domain: String,
        operation_id: String,
        install_log_path: Option<PathBuf>,
        backend: Arc<dyn Backend>,
        clock: SharedClock,
    ) -> Result<Self> {
        let log_path = PathBuf::from(site_dir.as_ref())
            .join(&operation_id)
            .join(format!("{operation_id}.log"));
        let recorder = Recorder::new(operation_id.clone(), log_path, install_log_path, clock.clone()).await?;
        Ok(Self {
            domain,
            operation_id,
            recorder,
            backend,
            clock,
            provisioned_servers: Mutex::new(Vec::new()),
            servers_to_remove: Mutex::new(Vec::new()),
        })
    }

    /// Persists a progress entry to the backend and mirrors it into the
    /// operation log. `state` drives the shared progress contract used by
    /// every driver.
    pub async fn report_progress(&self, state: ProgressState, completion_pct: u8, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let entry = ProgressEntry {
            domain: self.domain.clone(),
            operation_id: self.operation_id.clone(),
            state,
            completion_pct,
            message: message.clone(),
            created_at: self.clock.utc_now(),
        };
        self.backend.append_progress(entry).await?;
        match state {
            ProgressState::Failed => self.recorder.error(format!("{completion_pct}%: {message}")).await,
            _ => self.recorder.info(format!("{completion_pct}%: {message}")).await,
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.recorder.close().await;
    }
}

