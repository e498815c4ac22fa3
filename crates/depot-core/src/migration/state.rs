//! Durable migration progress record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::Result;

/// Checkpoint for one migration prefix.
///
/// Persisted after every processed path, so a crash loses at most the
/// paths that were in flight when it happened, never the whole run. The
/// checkpoint is scoped to exactly one prefix: loading a file written for
/// a different prefix discards it and starts fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationState {
    /// Path prefix this run covers
    pub prefix: String,

    /// Paths already copied to the target
    pub processed: HashSet<String>,

    /// Size of the fixed work set for the run
    pub total: u64,

    /// Paths of the work set already copied
    pub completed: u64,

    /// When the run (or the resumed original run) started
    pub started_at: DateTime<Utc>,

    /// Last state-changing event
    pub updated_at: DateTime<Utc>,
}

impl MigrationState {
    pub fn new(prefix: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            prefix: prefix.into(),
            processed: HashSet::new(),
            total: 0,
            completed: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// Whether a path was already copied in this or a previous run.
    pub fn is_processed(&self, path: &str) -> bool {
        self.processed.contains(path)
    }

    /// Record a successfully copied path.
    pub fn mark_processed(&mut self, path: &str) {
        if self.processed.insert(path.to_string()) {
            self.completed += 1;
        }
        self.updated_at = Utc::now();
    }

    /// Load the checkpoint for `prefix`, or create a fresh one when the
    /// file is absent, unreadable, or scoped to a different prefix.
    pub async fn load_or_create(path: &Path, prefix: &str) -> Self {
        match fs::read_to_string(path).await {
            Ok(data) => match serde_json::from_str::<MigrationState>(&data) {
                Ok(state) if state.prefix == prefix => {
                    info!(
                        prefix,
                        completed = state.processed.len(),
                        "resuming migration from checkpoint"
                    );
                    state
                }
                Ok(state) => {
                    info!(
                        old_prefix = %state.prefix,
                        new_prefix = prefix,
                        "checkpoint covers a different prefix, starting fresh"
                    );
                    Self::new(prefix)
                }
                Err(e) => {
                    warn!(path = %path.display(), "discarding unreadable checkpoint: {}", e);
                    Self::new(prefix)
                }
            },
            Err(_) => Self::new(prefix),
        }
    }

    /// Persist the checkpoint. Called after every state-changing event.
    ///
    /// Written to a sibling temp file and renamed into place, so a crash
    /// mid-write leaves the previous complete checkpoint on disk rather
    /// than a truncated one.
    pub async fn persist(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), completed = self.completed, "checkpoint saved");
        Ok(())
    }
}
