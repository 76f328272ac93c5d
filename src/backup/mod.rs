// src/backup/mod.rs
//! File-copy snapshots of the live database with sidecar metadata.
//!
//! A snapshot copies the database file plus any `-wal`/`-shm` sidecars and
//! writes a `.meta.json` describing what was captured. This is a best-effort
//! snapshot, not a live online backup: callers should quiesce writes or rely
//! on WAL checkpointing for consistency.

use crate::error::{MemoryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sidecar metadata written next to every snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMeta {
    pub timestamp: String,
    pub timestamp_epoch: i64,
    pub schema_version: i64,
    pub stats: BackupStats,
    pub source_path: String,
    pub filename: String,
}

/// Row counts and file size captured at snapshot time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub observations: i64,
    pub sessions: i64,
    pub summaries: i64,
    pub prompts: i64,
    pub db_size_bytes: u64,
}

/// One listed snapshot: the db file path plus its parsed metadata.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub meta: BackupMeta,
}

/// Create a snapshot of `db_path` in `backup_dir`.
///
/// Returns the metadata written to the sidecar file.
pub fn create(db_path: &Path, backup_dir: &Path) -> Result<BackupMeta> {
    if !db_path.exists() {
        return Err(MemoryError::InvalidInput(format!(
            "database file does not exist: {}",
            db_path.display()
        )));
    }
    std::fs::create_dir_all(backup_dir)?;

    // Millisecond-stamped filename; nudge forward on the rare same-ms
    // collision instead of overwriting an existing snapshot.
    let (filename, timestamp, timestamp_epoch) = {
        let mut attempt = 0;
        loop {
            let now = chrono::Utc::now();
            let name = format!("backup-{}.db", now.format("%Y-%m-%d-%H%M%S-%3f"));
            if !backup_dir.join(&name).exists() {
                break (name, now.to_rfc3339(), now.timestamp_millis());
            }
            attempt += 1;
            if attempt > 5 {
                return Err(MemoryError::Other("could not allocate backup filename".into()));
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
    };

    let target = backup_dir.join(&filename);
    std::fs::copy(db_path, &target)?;

    for suffix in ["-wal", "-shm"] {
        let sidecar = sibling_with_suffix(db_path, suffix);
        if sidecar.exists() {
            std::fs::copy(&sidecar, sibling_with_suffix(&target, suffix))?;
        }
    }

    let stats = read_stats(db_path)?;
    let schema_version = read_schema_version(db_path);

    let meta = BackupMeta {
        timestamp,
        timestamp_epoch,
        schema_version,
        stats,
        source_path: db_path.to_string_lossy().to_string(),
        filename: filename.clone(),
    };

    let meta_path = meta_path_for(&target);
    std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)?;

    tracing::info!(backup = %target.display(), "Created database backup");
    Ok(meta)
}

/// List snapshots in a directory, newest first.
///
/// A `.db` file without a readable `.meta.json` (or the reverse) is an
/// orphan and is silently discarded from the listing.
pub fn list(backup_dir: &Path) -> Result<Vec<BackupEntry>> {
    let mut entries = Vec::new();
    let read_dir = match std::fs::read_dir(backup_dir) {
        Ok(rd) => rd,
        Err(_) => return Ok(entries),
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("db") {
            continue;
        }
        let meta_path = meta_path_for(&path);
        let Ok(contents) = std::fs::read_to_string(&meta_path) else {
            tracing::debug!("Orphan backup without meta: {}", path.display());
            continue;
        };
        let Ok(meta) = serde_json::from_str::<BackupMeta>(&contents) else {
            tracing::debug!("Unreadable backup meta: {}", meta_path.display());
            continue;
        };
        entries.push(BackupEntry { path, meta });
    }

    entries.sort_by(|a, b| b.meta.timestamp_epoch.cmp(&a.meta.timestamp_epoch));
    Ok(entries)
}

/// Replace the live database with a snapshot.
///
/// Copies the snapshot's sidecars too, and removes live sidecars that are
/// absent from the snapshot so SQLite does not recover from a stale WAL.
pub fn restore(backup_file: &Path, db_path: &Path) -> Result<()> {
    if !backup_file.exists() {
        return Err(MemoryError::InvalidInput(format!(
            "backup file does not exist: {}",
            backup_file.display()
        )));
    }

    std::fs::copy(backup_file, db_path)?;

    for suffix in ["-wal", "-shm"] {
        let snapshot_sidecar = sibling_with_suffix(backup_file, suffix);
        let live_sidecar = sibling_with_suffix(db_path, suffix);
        if snapshot_sidecar.exists() {
            std::fs::copy(&snapshot_sidecar, &live_sidecar)?;
        } else if live_sidecar.exists() {
            std::fs::remove_file(&live_sidecar)?;
        }
    }

    tracing::info!(
        from = %backup_file.display(),
        to = %db_path.display(),
        "Restored database from backup"
    );
    Ok(())
}

/// Keep the `max_keep` most recent snapshots and delete the rest
/// (including their sidecars). `max_keep <= 0` is a validation failure.
pub fn rotate(backup_dir: &Path, max_keep: i64) -> Result<usize> {
    if max_keep <= 0 {
        return Err(MemoryError::InvalidInput(
            "backup rotation count must be positive".into(),
        ));
    }

    let entries = list(backup_dir)?;
    let mut deleted = 0;
    for entry in entries.iter().skip(max_keep as usize) {
        std::fs::remove_file(&entry.path)?;
        let _ = std::fs::remove_file(meta_path_for(&entry.path));
        for suffix in ["-wal", "-shm"] {
            let _ = std::fs::remove_file(sibling_with_suffix(&entry.path, suffix));
        }
        deleted += 1;
    }

    if deleted > 0 {
        tracing::info!(deleted, kept = max_keep, "Rotated backups");
    }
    Ok(deleted)
}

/// `foo.db` -> `foo.db-wal` style sibling path.
fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// `backup-<ts>.db` -> `backup-<ts>.meta.json`.
fn meta_path_for(db_file: &Path) -> PathBuf {
    db_file.with_extension("meta.json")
}

/// Row counts and file size from the source database.
fn read_stats(db_path: &Path) -> Result<BackupStats> {
    let size = std::fs::metadata(db_path)?.len();
    let conn = rusqlite::Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    )?;
    let count = |table: &str| -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap_or(0)
    };
    Ok(BackupStats {
        observations: count("observations"),
        sessions: count("sessions"),
        summaries: count("summaries"),
        prompts: count("prompts"),
        db_size_bytes: size,
    })
}

/// Highest applied schema version, 0 when unreadable.
fn read_schema_version(db_path: &Path) -> i64 {
    rusqlite::Connection::open_with_flags(db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
        .and_then(|conn| crate::db::schema::current_version(&conn))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn make_db(dir: &Path) -> PathBuf {
        let db_path = dir.join("kiro-memory.db");
        let conn = Connection::open(&db_path).unwrap();
        crate::db::schema::run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO observations (session_id, project, type, title, content_hash,
             created_at, created_at_epoch)
             VALUES ('s1', 'p1', 'command', 'snapshot me', 'abcd', '2026-01-01T00:00:00Z', 1)",
            [],
        )
        .unwrap();
        db_path
    }

    #[test]
    fn test_create_writes_db_and_meta() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = make_db(tmp.path());
        let backup_dir = tmp.path().join("backups");

        let meta = create(&db_path, &backup_dir).unwrap();
        assert!(meta.filename.starts_with("backup-"));
        assert!(meta.filename.ends_with(".db"));
        assert_eq!(meta.stats.observations, 1);
        assert_eq!(meta.schema_version, crate::db::schema::latest_version());
        assert!(meta.stats.db_size_bytes > 0);

        assert!(backup_dir.join(&meta.filename).exists());
        assert!(meta_path_for(&backup_dir.join(&meta.filename)).exists());
    }

    #[test]
    fn test_create_missing_db_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = create(&tmp.path().join("ghost.db"), &tmp.path().join("backups"));
        assert!(matches!(err, Err(MemoryError::InvalidInput(_))));
    }

    #[test]
    fn test_list_newest_first_and_discards_orphans() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = make_db(tmp.path());
        let backup_dir = tmp.path().join("backups");

        create(&db_path, &backup_dir).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = create(&db_path, &backup_dir).unwrap();

        // An orphan .db without meta must not appear
        std::fs::write(backup_dir.join("backup-orphan.db"), b"junk").unwrap();

        let entries = list(&backup_dir).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].meta.filename, second.filename);
        assert!(entries[0].meta.timestamp_epoch >= entries[1].meta.timestamp_epoch);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list(&tmp.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_restore_replaces_live_db_and_drops_stale_sidecars() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = make_db(tmp.path());
        let backup_dir = tmp.path().join("backups");
        let meta = create(&db_path, &backup_dir).unwrap();

        // Mutate the live DB after the snapshot, and fabricate a stale WAL
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("DELETE FROM observations", []).unwrap();
        }
        let stale_wal = sibling_with_suffix(&db_path, "-wal");
        std::fs::write(&stale_wal, b"stale").unwrap();

        restore(&backup_dir.join(&meta.filename), &db_path).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1, "snapshot contents restored");
        assert!(!stale_wal.exists(), "stale sidecar removed");
    }

    #[test]
    fn test_rotate_keeps_newest() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = make_db(tmp.path());
        let backup_dir = tmp.path().join("backups");

        for _ in 0..4 {
            create(&db_path, &backup_dir).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let deleted = rotate(&backup_dir, 2).unwrap();
        assert_eq!(deleted, 2);

        let remaining = list(&backup_dir).unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn test_rotate_rejects_non_positive() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            rotate(tmp.path(), 0),
            Err(MemoryError::InvalidInput(_))
        ));
        assert!(matches!(
            rotate(tmp.path(), -3),
            Err(MemoryError::InvalidInput(_))
        ));
    }
}
