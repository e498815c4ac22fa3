//! Backend-to-backend migration engine.
//!
//! One engine instance owns one long-running batch operation at a time:
//! enumerate every object under a prefix on the source backend, then copy
//! the fixed work set to the target with bounded concurrency, per-path
//! retries, and a checkpoint persisted after every processed path. A
//! path's permanent failure is reported through the error callback and
//! never aborts the run; cancelling lets in-flight copies finish, starts
//! no new ones, and persists a final checkpoint so the next run picks up
//! where this one stopped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::state::MigrationState;
use crate::error::MigrationError;
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// Invoked once per successfully migrated path.
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Invoked once per path that exhausted its retry budget.
pub type ErrorCallback = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// Migration tuning knobs. Immutable once a run starts; the engine
/// snapshots them at construction.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Concurrent copy workers
    pub concurrency: usize,
    /// Additional attempts after the first failure of a path
    pub retry_count: u32,
    /// Base backoff, multiplied by the attempt index
    pub retry_backoff: Duration,
    /// Delete each source object once its copy is durable on the target
    pub delete_after_copy: bool,
    /// Where the checkpoint file lives
    pub persist_path: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            retry_count: 3,
            retry_backoff: Duration::from_millis(500),
            delete_after_copy: false,
            persist_path: PathBuf::from(".migration_state.json"),
        }
    }
}

impl MigrationConfig {
    /// Replace unset values with their defaults.
    pub fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.concurrency == 0 {
            self.concurrency = defaults.concurrency;
        }
        if self.retry_backoff.is_zero() {
            self.retry_backoff = defaults.retry_backoff;
        }
        if self.persist_path.as_os_str().is_empty() {
            self.persist_path = defaults.persist_path;
        }
        self
    }
}

/// How a migration run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The work set was drained
    Completed,
    /// The run was cancelled; the checkpoint holds partial progress
    Cancelled,
}

/// Summary of one migration run.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub outcome: MigrationOutcome,
    /// Paths of the work set copied, including previous runs' progress
    pub completed: u64,
    /// Size of the work set
    pub total: u64,
    /// Paths that exhausted their retry budget this run
    pub failed: Vec<String>,
}

/// Engine for one source-to-target migration direction.
pub struct MigrationEngine {
    source: Arc<dyn StorageBackend>,
    target: Arc<dyn StorageBackend>,
    config: MigrationConfig,
    active: AtomicBool,
    shutdown: AtomicBool,
    completed: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
}

impl MigrationEngine {
    /// Create an engine copying from `source` to `target`.
    pub fn new(
        source: Arc<dyn StorageBackend>,
        target: Arc<dyn StorageBackend>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            source,
            target,
            config: config.with_defaults(),
            active: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            completed: Arc::new(AtomicU64::new(0)),
            total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The configuration this engine runs with.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Whether a run is currently active.
    pub fn is_migrating(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Snapshot of `(completed, total)`, safe to call concurrently with a
    /// running migration.
    pub fn status(&self) -> (u64, u64) {
        (
            self.completed.load(Ordering::Acquire),
            self.total.load(Ordering::Acquire),
        )
    }

    /// Cancel the in-flight run, if any. In-flight copies finish; no new
    /// ones start. The signal latches: a shut-down engine stays cancelled,
    /// so construct a fresh engine to migrate again.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Migrate every object under `prefix` from source to target.
    ///
    /// Single-flight at the engine level: a second call while a run is
    /// active fails with `AlreadyActive`. The work set is fixed at listing
    /// time; objects created afterwards are not picked up by this run.
    pub async fn migrate_to(
        &self,
        prefix: &str,
        on_progress: ProgressCallback,
        on_error: ErrorCallback,
    ) -> Result<MigrationReport> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MigrationError::AlreadyActive.into());
        }
        let _active = ClearOnDrop(&self.active);

        // Checked before the listing too: a cancellation that lands before
        // the run starts performs no work at all.
        if self.shutdown_requested() {
            info!(prefix, "shutdown requested, migration not started");
            return Ok(MigrationReport {
                outcome: MigrationOutcome::Cancelled,
                completed: 0,
                total: 0,
                failed: Vec::new(),
            });
        }

        info!(
            prefix,
            source = self.source.name(),
            target = self.target.name(),
            "starting migration"
        );

        // The fixed work set for this run.
        let paths = self
            .source
            .list(prefix)
            .await
            .map_err(|e| MigrationError::Listing(e.to_string()))?;

        let mut state = MigrationState::load_or_create(&self.config.persist_path, prefix).await;
        state.total = paths.len() as u64;
        let already_done = paths
            .iter()
            .filter(|p| state.is_processed(p.as_str()))
            .count() as u64;
        state.completed = already_done;

        self.total.store(state.total, Ordering::Release);
        self.completed.store(already_done, Ordering::Release);

        if let Err(e) = state.persist(&self.config.persist_path).await {
            warn!("failed to persist initial checkpoint: {}", e);
        }

        info!(
            total = state.total,
            resumed = already_done,
            concurrency = self.config.concurrency,
            "migration work set listed"
        );

        let state = Arc::new(Mutex::new(state));
        let failed = Arc::new(std::sync::Mutex::new(Vec::new()));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = Vec::new();
        let mut cancelled = false;

        for path in paths {
            // Checked before dequeuing each job; in-flight copies finish.
            if self.shutdown_requested() {
                info!("shutdown signal received, stopping migration");
                cancelled = true;
                break;
            }

            if state.lock().await.is_processed(&path) {
                debug!(%path, "already processed, skipping");
                continue;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Io(std::io::Error::other(format!("semaphore closed: {}", e))))?;
            let job = MigrateJob {
                source: Arc::clone(&self.source),
                target: Arc::clone(&self.target),
                config: self.config.clone(),
                state: Arc::clone(&state),
                completed: Arc::clone(&self.completed),
                on_progress: Arc::clone(&on_progress),
                on_error: Arc::clone(&on_error),
                failed: Arc::clone(&failed),
            };

            handles.push(tokio::spawn(async move {
                job.run(&path).await;
                drop(permit);
            }));
        }

        // Every handle is joined even when one fails, so completed work is
        // always in the final checkpoint.
        let mut worker_failure = None;
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("worker task failed: {}", e);
                worker_failure.get_or_insert_with(|| {
                    Error::Io(std::io::Error::other(format!("worker task failed: {}", e)))
                });
            }
        }

        // Final checkpoint so a cancelled or failed run resumes cleanly.
        {
            let state = state.lock().await;
            if let Err(e) = state.persist(&self.config.persist_path).await {
                warn!("failed to persist final checkpoint: {}", e);
            }
        }

        if let Some(err) = worker_failure {
            return Err(err);
        }

        let (completed, total) = self.status();
        let failed = std::mem::take(&mut *failed.lock().unwrap());
        let outcome = if cancelled {
            MigrationOutcome::Cancelled
        } else {
            MigrationOutcome::Completed
        };

        info!(
            ?outcome,
            completed,
            total,
            failed = failed.len(),
            "migration run finished"
        );

        Ok(MigrationReport {
            outcome,
            completed,
            total,
            failed,
        })
    }
}

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Per-path copy work shared with the worker tasks.
struct MigrateJob {
    source: Arc<dyn StorageBackend>,
    target: Arc<dyn StorageBackend>,
    config: MigrationConfig,
    state: Arc<Mutex<MigrationState>>,
    completed: Arc<AtomicU64>,
    on_progress: ProgressCallback,
    on_error: ErrorCallback,
    failed: Arc<std::sync::Mutex<Vec<String>>>,
}

impl MigrateJob {
    async fn run(&self, path: &str) {
        match self.copy_with_retries(path).await {
            Ok(()) => {
                {
                    let mut state = self.state.lock().await;
                    state.mark_processed(path);
                    self.completed.store(state.completed, Ordering::Release);
                    if let Err(e) = state.persist(&self.config.persist_path).await {
                        warn!(path, "failed to persist checkpoint: {}", e);
                    }
                }

                (self.on_progress)(path);

                if self.config.delete_after_copy {
                    if let Err(e) = self.source.delete(path).await {
                        warn!(path, "failed to delete source object after copy: {}", e);
                    }
                }
            }
            Err(e) => {
                warn!(path, "migration failed permanently: {}", e);
                (self.on_error)(path, &e);
                self.failed.lock().unwrap().push(path.to_string());
            }
        }
    }

    async fn copy_with_retries(&self, path: &str) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.copy_once(path).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt >= self.config.retry_count {
                        return Err(e);
                    }
                    attempt += 1;
                    let delay = self.config.retry_backoff * attempt;
                    debug!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "copy failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn copy_once(&self, path: &str) -> Result<()> {
        let data = self.source.get(path).await?;
        self.target.put(path, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ByteStream, FileInfo, ObjectStoreBackend};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::TempDir;

    /// Panics on writing one configured path, delegating everything else.
    struct PanickingPut {
        inner: Arc<dyn StorageBackend>,
        panic_on: String,
    }

    #[async_trait]
    impl StorageBackend for PanickingPut {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn put(&self, path: &str, data: Bytes) -> Result<()> {
            if path == self.panic_on {
                panic!("injected worker panic");
            }
            self.inner.put(path, data).await
        }

        async fn get(&self, path: &str) -> Result<Bytes> {
            self.inner.get(path).await
        }

        async fn stream(&self, path: &str) -> Result<ByteStream> {
            self.inner.stream(path).await
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.inner.delete(path).await
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }

        async fn stat(&self, path: &str) -> Result<FileInfo> {
            self.inner.stat(path).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list(prefix).await
        }

        async fn delete_folder(&self, prefix: &str) -> Result<()> {
            self.inner.delete_folder(prefix).await
        }

        async fn rename(&self, from: &str, to: &str) -> Result<()> {
            self.inner.rename(from, to).await
        }
    }

    fn callbacks() -> (ProgressCallback, ErrorCallback) {
        (Arc::new(|_: &str| {}), Arc::new(|_: &str, _: &Error| {}))
    }

    fn config(dir: &TempDir) -> MigrationConfig {
        MigrationConfig {
            concurrency: 4,
            retry_count: 1,
            retry_backoff: Duration::from_millis(1),
            delete_after_copy: false,
            persist_path: dir.path().join("state.json"),
        }
    }

    #[tokio::test]
    async fn test_migrates_all_paths_under_prefix() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ObjectStoreBackend::in_memory());
        let target = Arc::new(ObjectStoreBackend::in_memory());

        for i in 0..10 {
            source
                .put(&format!("p/{}.bin", i), Bytes::from(format!("v{}", i)))
                .await
                .unwrap();
        }
        source.put("other/x.bin", Bytes::from("x")).await.unwrap();

        let engine = MigrationEngine::new(source, target.clone(), config(&dir));
        let (progress, error) = callbacks();
        let report = engine.migrate_to("p", progress, error).await.unwrap();

        assert_eq!(report.outcome, MigrationOutcome::Completed);
        assert_eq!(report.completed, 10);
        assert_eq!(report.total, 10);
        assert!(report.failed.is_empty());
        assert_eq!(target.list("p").await.unwrap().len(), 10);
        assert!(!target.exists("other/x.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_second_concurrent_run_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ObjectStoreBackend::in_memory());
        let target = Arc::new(ObjectStoreBackend::in_memory());
        let engine = MigrationEngine::new(source, target, config(&dir));

        assert!(!engine.is_migrating());
        engine.active.store(true, Ordering::Release);

        let (progress, error) = callbacks();
        let err = engine.migrate_to("p", progress, error).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Migration(MigrationError::AlreadyActive)
        ));
        assert!(engine.is_migrating());
    }

    #[tokio::test]
    async fn test_delete_after_copy_empties_source() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ObjectStoreBackend::in_memory());
        let target = Arc::new(ObjectStoreBackend::in_memory());

        for i in 0..5 {
            source
                .put(&format!("p/{}.bin", i), Bytes::from("v"))
                .await
                .unwrap();
        }

        let mut config = config(&dir);
        config.delete_after_copy = true;
        let engine = MigrationEngine::new(source.clone(), target.clone(), config);

        let (progress, error) = callbacks();
        engine.migrate_to("p", progress, error).await.unwrap();

        assert!(source.list("p").await.unwrap().is_empty());
        assert_eq!(target.list("p").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_shutdown_before_run_starts_nothing() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ObjectStoreBackend::in_memory());
        source.put("p/a.bin", Bytes::from("v")).await.unwrap();
        let target = Arc::new(ObjectStoreBackend::in_memory());
        let engine = MigrationEngine::new(source, target.clone(), config(&dir));

        engine.shutdown();

        let (progress, error) = callbacks();
        let report = engine.migrate_to("p", progress, error).await.unwrap();

        assert_eq!(report.outcome, MigrationOutcome::Cancelled);
        assert_eq!(report.total, 0);
        assert!(target.list("p").await.unwrap().is_empty());
        // No work set was listed, so no checkpoint was written either.
        assert!(!dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn test_worker_panic_still_persists_checkpoint() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ObjectStoreBackend::in_memory());
        for i in 0..5 {
            source
                .put(&format!("p/{}.bin", i), Bytes::from("v"))
                .await
                .unwrap();
        }
        let target = Arc::new(PanickingPut {
            inner: Arc::new(ObjectStoreBackend::in_memory()),
            panic_on: "p/2.bin".to_string(),
        });

        let mut config = config(&dir);
        config.retry_count = 0;
        let engine = MigrationEngine::new(source, target, config);

        let (progress, error) = callbacks();
        let err = engine.migrate_to("p", progress, error).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        // The surviving workers' progress reached the checkpoint before
        // the join failure surfaced.
        let state =
            MigrationState::load_or_create(&dir.path().join("state.json"), "p").await;
        assert_eq!(state.processed.len(), 4);
        assert!(!state.is_processed("p/2.bin"));
        assert!(!engine.is_migrating());
    }

    #[tokio::test]
    async fn test_with_defaults_fills_unset_values() {
        let config = MigrationConfig {
            concurrency: 0,
            retry_count: 0,
            retry_backoff: Duration::ZERO,
            delete_after_copy: false,
            persist_path: PathBuf::new(),
        }
        .with_defaults();

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retry_backoff, Duration::from_millis(500));
        assert_eq!(config.persist_path, PathBuf::from(".migration_state.json"));
        // Zero retries is a legitimate setting, not an unset value.
        assert_eq!(config.retry_count, 0);
    }
}
