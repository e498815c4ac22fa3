//! Dual-backend router.
//!
//! Wraps a primary and an optional secondary backend and routes every
//! operation according to the migration mode. The routing snapshot lives
//! behind a read-mostly lock held only long enough to read or swap the
//! configuration; the migration engine itself never goes through the
//! router, it copies between the two backends directly.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::backend::{ByteStream, FileInfo, StorageBackend};
use crate::migration::{MigrationConfig, MigrationEngine};
use crate::{Error, Result};

/// Routing mode for the dual backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationMode {
    /// Transparent pass-through to the primary backend
    #[default]
    None,
    /// Writes prefer the secondary, reads prefer the secondary with
    /// primary fallback (filling the secondary up)
    ToSecondary,
    /// Primary is authoritative again (migration reversed or rolled back)
    FromSecondary,
}

#[derive(Default)]
struct Routes {
    secondary: Option<Arc<dyn StorageBackend>>,
    mode: MigrationMode,
    engine: Option<Arc<MigrationEngine>>,
}

/// A `StorageBackend` that routes between a primary and a secondary
/// backend according to the migration mode.
///
/// `delete`/`delete_folder` are deliberately weaker than `put`/`rename`
/// whenever a secondary is attached: both backends are attempted and a
/// single side's failure is swallowed, so deletion is eventually
/// consistent across backends rather than atomic.
pub struct DualBackend {
    primary: Arc<dyn StorageBackend>,
    routes: RwLock<Routes>,
}

impl DualBackend {
    pub fn new(primary: Arc<dyn StorageBackend>) -> Self {
        Self {
            primary,
            routes: RwLock::new(Routes::default()),
        }
    }

    /// The wrapped primary backend.
    pub fn primary(&self) -> &Arc<dyn StorageBackend> {
        &self.primary
    }

    /// Current routing mode.
    pub async fn mode(&self) -> MigrationMode {
        self.routes.read().await.mode
    }

    /// The active migration engine, when migration is enabled.
    pub async fn migration(&self) -> Option<Arc<MigrationEngine>> {
        self.routes.read().await.engine.clone()
    }

    /// Attach `target` as the secondary backend and switch to `mode`.
    ///
    /// Unset config values are filled with defaults, the routing snapshot
    /// is swapped atomically, and an engine for the implied copy direction
    /// is constructed: `ToSecondary` backfills primary into the target,
    /// `FromSecondary` drains the target back into primary. Any previous
    /// in-flight run is cancelled first.
    pub async fn enable_migration(
        &self,
        target: Arc<dyn StorageBackend>,
        mode: MigrationMode,
        config: MigrationConfig,
    ) -> Result<Arc<MigrationEngine>> {
        let (source, dest) = match mode {
            MigrationMode::ToSecondary => (Arc::clone(&self.primary), Arc::clone(&target)),
            MigrationMode::FromSecondary => (Arc::clone(&target), Arc::clone(&self.primary)),
            MigrationMode::None => {
                return Err(Error::Config(
                    "enable_migration requires ToSecondary or FromSecondary".to_string(),
                ))
            }
        };

        let config = config.with_defaults();
        let engine = Arc::new(MigrationEngine::new(source, dest, config));

        let mut routes = self.routes.write().await;
        if let Some(old) = routes.engine.take() {
            old.shutdown();
        }
        routes.secondary = Some(target);
        routes.mode = mode;
        routes.engine = Some(Arc::clone(&engine));

        Ok(engine)
    }

    /// Cancel any in-flight migration run, reset the mode to `None`, and
    /// detach the secondary backend.
    pub async fn disable_migration(&self) {
        let mut routes = self.routes.write().await;
        if let Some(engine) = routes.engine.take() {
            engine.shutdown();
        }
        routes.secondary = None;
        routes.mode = MigrationMode::None;
    }

    async fn snapshot(&self) -> (MigrationMode, Option<Arc<dyn StorageBackend>>) {
        let routes = self.routes.read().await;
        (routes.mode, routes.secondary.clone())
    }

    /// Reads prefer the secondary in `ToSecondary` mode; a secondary
    /// miss/error falls back to primary and is logged, not raised.
    fn read_order(
        &self,
        mode: MigrationMode,
        secondary: Option<Arc<dyn StorageBackend>>,
    ) -> (Arc<dyn StorageBackend>, Option<Arc<dyn StorageBackend>>) {
        match (mode, secondary) {
            (MigrationMode::ToSecondary, Some(sec)) => (sec, Some(Arc::clone(&self.primary))),
            _ => (Arc::clone(&self.primary), None),
        }
    }
}

#[async_trait]
impl StorageBackend for DualBackend {
    fn name(&self) -> &str {
        "dual"
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let (mode, secondary) = self.snapshot().await;

        match (mode, secondary) {
            (MigrationMode::ToSecondary, Some(sec)) => {
                match sec.put(path, data.clone()).await {
                    Ok(()) => Ok(()),
                    Err(sec_err) => {
                        warn!(
                            path,
                            backend = sec.name(),
                            "secondary write failed, falling back to primary: {}",
                            sec_err
                        );
                        // Keep the data durable on primary, but still return
                        // the secondary's error so callers observe degraded
                        // mode.
                        self.primary.put(path, data).await?;
                        Err(sec_err)
                    }
                }
            }
            _ => self.primary.put(path, data).await,
        }
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let (mode, secondary) = self.snapshot().await;
        let (first, fallback) = self.read_order(mode, secondary);

        match first.get(path).await {
            Ok(data) => Ok(data),
            Err(err) => match fallback {
                Some(primary) => {
                    debug!(
                        path,
                        backend = first.name(),
                        "read falling back to primary: {}",
                        err
                    );
                    primary.get(path).await
                }
                None => Err(err),
            },
        }
    }

    async fn stream(&self, path: &str) -> Result<ByteStream> {
        let (mode, secondary) = self.snapshot().await;
        let (first, fallback) = self.read_order(mode, secondary);

        match first.stream(path).await {
            Ok(stream) => Ok(stream),
            Err(err) => match fallback {
                Some(primary) => {
                    debug!(
                        path,
                        backend = first.name(),
                        "stream falling back to primary: {}",
                        err
                    );
                    primary.stream(path).await
                }
                None => Err(err),
            },
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let (_, secondary) = self.snapshot().await;

        match secondary {
            Some(sec) => {
                let primary_result = self.primary.delete(path).await;
                let secondary_result = sec.delete(path).await;

                match (primary_result, secondary_result) {
                    (Err(pe), Err(se)) => {
                        warn!(path, "delete failed on both backends: {}; {}", pe, se);
                        Err(pe)
                    }
                    (Err(pe), Ok(())) => {
                        warn!(path, "delete failed on primary only: {}", pe);
                        Ok(())
                    }
                    (Ok(()), Err(se)) => {
                        warn!(path, "delete failed on secondary only: {}", se);
                        Ok(())
                    }
                    (Ok(()), Ok(())) => Ok(()),
                }
            }
            None => self.primary.delete(path).await,
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let (mode, secondary) = self.snapshot().await;
        let (first, fallback) = self.read_order(mode, secondary);

        match first.exists(path).await {
            Ok(true) => Ok(true),
            Ok(false) => match fallback {
                Some(primary) => primary.exists(path).await,
                None => Ok(false),
            },
            Err(err) => match fallback {
                Some(primary) => primary.exists(path).await,
                None => Err(err),
            },
        }
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        let (mode, secondary) = self.snapshot().await;
        let (first, fallback) = self.read_order(mode, secondary);

        match first.stat(path).await {
            Ok(info) => Ok(info),
            Err(err) => match fallback {
                Some(primary) => primary.stat(path).await,
                None => Err(err),
            },
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let (_, secondary) = self.snapshot().await;

        match secondary {
            // Union of both sides: mid-backfill the secondary holds only a
            // slice of the namespace, and listing it alone would hide
            // objects that `get` still serves from primary.
            Some(sec) => {
                let mut keys = self.primary.list(prefix).await?;
                match sec.list(prefix).await {
                    Ok(more) => keys.extend(more),
                    Err(err) => {
                        warn!(
                            prefix,
                            backend = sec.name(),
                            "secondary list failed, listing primary only: {}",
                            err
                        );
                    }
                }
                keys.sort();
                keys.dedup();
                Ok(keys)
            }
            None => self.primary.list(prefix).await,
        }
    }

    async fn delete_folder(&self, prefix: &str) -> Result<()> {
        let (_, secondary) = self.snapshot().await;

        match secondary {
            Some(sec) => {
                let primary_result = self.primary.delete_folder(prefix).await;
                let secondary_result = sec.delete_folder(prefix).await;

                match (primary_result, secondary_result) {
                    (Err(pe), Err(se)) => {
                        warn!(prefix, "folder delete failed on both backends: {}; {}", pe, se);
                        Err(pe)
                    }
                    (Err(pe), Ok(())) => {
                        warn!(prefix, "folder delete failed on primary only: {}", pe);
                        Ok(())
                    }
                    (Ok(()), Err(se)) => {
                        warn!(prefix, "folder delete failed on secondary only: {}", se);
                        Ok(())
                    }
                    (Ok(()), Ok(())) => Ok(()),
                }
            }
            None => self.primary.delete_folder(prefix).await,
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (mode, secondary) = self.snapshot().await;

        match (mode, secondary) {
            (MigrationMode::ToSecondary, Some(sec)) => match sec.rename(from, to).await {
                Ok(()) => Ok(()),
                Err(sec_err) => {
                    warn!(
                        from,
                        to,
                        backend = sec.name(),
                        "secondary rename failed, falling back to primary: {}",
                        sec_err
                    );
                    self.primary.rename(from, to).await?;
                    Err(sec_err)
                }
            },
            _ => self.primary.rename(from, to).await,
        }
    }
}
