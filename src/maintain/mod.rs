// src/maintain/mod.rs
// Maintenance: filesystem-based stale detection, decay statistics, and the
// consolidation entry point

use crate::config::RetentionPolicy;
use crate::db::observations::{
    consolidate_sync, mark_stale_sync, recent_with_files_modified_sync, ConsolidateOptions,
    ConsolidateResult,
};
use crate::db::pool::DatabasePool;
use crate::db::retention::{apply_retention_sync, RetentionReport};
use crate::error::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// How many recent observations one stale sweep inspects.
const STALE_SCAN_LIMIT: usize = 500;

/// "Recently accessed" horizon for decay statistics.
const RECENT_ACCESS_MS: i64 = 48 * 3_600_000;

/// Decay statistics for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DecayStats {
    pub total: i64,
    pub stale: i64,
    pub never_accessed: i64,
    pub recently_accessed: i64,
}

/// Maintenance operations over one pool.
pub struct Maintainer {
    pool: Arc<DatabasePool>,
}

impl Maintainer {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    /// Mark observations stale when a file they modified has changed since.
    ///
    /// Inspects the 500 most recent observations of the project that list
    /// modified files. Each path is stat'd individually; a filesystem error
    /// on one path never aborts the sweep. Returns the number of
    /// newly-flagged observations.
    pub async fn detect_stale(&self, project: &str) -> Result<usize> {
        let project_owned = project.to_string();
        let candidates = self
            .pool
            .run(move |conn| {
                recent_with_files_modified_sync(conn, &project_owned, STALE_SCAN_LIMIT)
            })
            .await?;

        let mut stale_ids = Vec::new();
        for obs in &candidates {
            if obs.stale {
                continue;
            }
            let Some(files) = obs.files_modified.as_deref() else {
                continue;
            };
            let changed = files
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .any(|path| file_mtime_ms(Path::new(path))
                    .map(|mtime| mtime > obs.created_at_epoch)
                    .unwrap_or(false));
            if changed {
                stale_ids.push(obs.id);
            }
        }

        if stale_ids.is_empty() {
            return Ok(0);
        }

        let count = stale_ids.len();
        let ids = stale_ids;
        self.pool
            .run(move |conn| mark_stale_sync(conn, &ids, true))
            .await?;

        tracing::info!(project, count, "Marked observations stale");
        Ok(count)
    }

    /// Merge repetitive observation groups. See
    /// [`consolidate_sync`](crate::db::observations::consolidate_sync).
    pub async fn consolidate(
        &self,
        project: &str,
        opts: ConsolidateOptions,
    ) -> Result<ConsolidateResult> {
        let project = project.to_string();
        self.pool
            .run(move |conn| consolidate_sync(conn, &project, opts))
            .await
    }

    /// Decay statistics: total rows, stale rows, never-accessed rows, and
    /// rows accessed in the last 48 hours.
    pub async fn decay_stats(&self, project: &str) -> Result<DecayStats> {
        let project = project.to_string();
        self.pool
            .run(move |conn| {
                let recent_cutoff = chrono::Utc::now().timestamp_millis() - RECENT_ACCESS_MS;
                let (total, stale, never_accessed, recently_accessed) = conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(stale), 0),
                            COALESCE(SUM(CASE WHEN last_accessed_epoch IS NULL THEN 1 ELSE 0 END), 0),
                            COALESCE(SUM(CASE WHEN last_accessed_epoch >= ?2 THEN 1 ELSE 0 END), 0)
                     FROM observations WHERE project = ?1",
                    rusqlite::params![project, recent_cutoff],
                    |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    },
                )?;
                Ok::<_, rusqlite::Error>(DecayStats {
                    total,
                    stale,
                    never_accessed,
                    recently_accessed,
                })
            })
            .await
    }

    /// Run the retention sweep with the given policy.
    pub async fn apply_retention(&self, policy: RetentionPolicy) -> Result<RetentionReport> {
        self.pool
            .run(move |conn| apply_retention_sync(conn, &policy))
            .await
    }
}

/// mtime of a file in epoch milliseconds, None when unreadable.
fn file_mtime_ms(path: &Path) -> Option<i64> {
    let mtime = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = mtime.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as i64)
}
