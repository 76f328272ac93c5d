// src/db/embeddings.rs
// Per-observation dense vector storage

use crate::db::observations::{observation_from_row, OBS_COLUMNS};
use crate::db::types::Observation;
use crate::error::{MemoryError, Result};
use crate::utils::now_pair;
use rusqlite::{params, Connection};

/// A stored vector row for scanning.
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    pub observation_id: i64,
    pub embedding: Vec<u8>,
    pub dimensions: i64,
}

/// Embedding coverage counters.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EmbeddingStats {
    pub total: i64,
    pub embedded: i64,
    pub percent: f64,
}

/// Upsert the vector for an observation.
///
/// The blob is little-endian f32; `length(blob) == dimensions * 4` is both
/// validated here and enforced by a schema CHECK.
pub fn put_embedding_sync(
    conn: &Connection,
    observation_id: i64,
    embedding: &[u8],
    model: &str,
    dimensions: usize,
) -> Result<()> {
    if embedding.len() != dimensions * 4 {
        return Err(MemoryError::InvalidInput(format!(
            "embedding blob is {} bytes, expected {} for {} dimensions",
            embedding.len(),
            dimensions * 4,
            dimensions
        )));
    }
    let (created_at, created_at_epoch) = now_pair();
    conn.execute(
        "INSERT OR REPLACE INTO observation_embeddings
         (observation_id, embedding, model, dimensions, created_at, created_at_epoch)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            observation_id,
            embedding,
            model,
            dimensions as i64,
            created_at,
            created_at_epoch
        ],
    )?;
    Ok(())
}

/// Every stored vector, optionally restricted to one project.
pub fn embeddings_for_project_sync(
    conn: &Connection,
    project: Option<&str>,
) -> rusqlite::Result<Vec<EmbeddingRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT e.observation_id, e.embedding, e.dimensions
         FROM observation_embeddings e
         JOIN observations o ON o.id = e.observation_id
         WHERE ?1 IS NULL OR o.project = ?1",
    )?;
    let rows = stmt.query_map(params![project], |row| {
        Ok(EmbeddingRow {
            observation_id: row.get(0)?,
            embedding: row.get(1)?,
            dimensions: row.get(2)?,
        })
    })?;
    rows.collect()
}

/// Observations that do not yet have a vector, oldest first, for backfill.
pub fn observations_missing_embeddings_sync(
    conn: &Connection,
    limit: usize,
) -> rusqlite::Result<Vec<Observation>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {OBS_COLUMNS} FROM observations
         WHERE id NOT IN (SELECT observation_id FROM observation_embeddings)
         ORDER BY created_at_epoch ASC, id ASC
         LIMIT ?"
    ))?;
    let rows = stmt.query_map([limit as i64], observation_from_row)?;
    rows.collect()
}

/// Coverage counters: total observations, embedded count, percentage.
pub fn embedding_stats_sync(conn: &Connection) -> rusqlite::Result<EmbeddingStats> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0))?;
    let embedded: i64 =
        conn.query_row("SELECT COUNT(*) FROM observation_embeddings", [], |r| r.get(0))?;
    let percent = if total > 0 {
        (embedded as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    Ok(EmbeddingStats {
        total,
        embedded,
        percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::observations::{store_observation_sync, NewObservation};
    use crate::db::test_support::setup_test_connection;

    fn store_obs(conn: &Connection, project: &str, title: &str) -> i64 {
        store_observation_sync(
            conn,
            NewObservation {
                session_id: "s1".to_string(),
                project: project.to_string(),
                obs_type: "research".to_string(),
                title: title.to_string(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn le_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    #[test]
    fn test_put_and_scan() {
        let conn = setup_test_connection();
        let id = store_obs(&conn, "p1", "first");
        put_embedding_sync(&conn, id, &le_bytes(&[1.0, 0.0]), "test-model", 2).unwrap();

        let rows = embeddings_for_project_sync(&conn, Some("p1")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].observation_id, id);
        assert_eq!(rows[0].dimensions, 2);

        // Other projects see nothing; None sees everything
        assert!(embeddings_for_project_sync(&conn, Some("p2")).unwrap().is_empty());
        assert_eq!(embeddings_for_project_sync(&conn, None).unwrap().len(), 1);
    }

    #[test]
    fn test_put_overwrites_on_conflict() {
        let conn = setup_test_connection();
        let id = store_obs(&conn, "p1", "first");
        put_embedding_sync(&conn, id, &le_bytes(&[1.0, 0.0]), "m", 2).unwrap();
        put_embedding_sync(&conn, id, &le_bytes(&[0.0, 1.0]), "m", 2).unwrap();

        let rows = embeddings_for_project_sync(&conn, Some("p1")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].embedding, le_bytes(&[0.0, 1.0]));
    }

    #[test]
    fn test_blob_length_validated() {
        let conn = setup_test_connection();
        let id = store_obs(&conn, "p1", "first");
        let err = put_embedding_sync(&conn, id, &[0u8; 7], "m", 2);
        assert!(matches!(err, Err(MemoryError::InvalidInput(_))));
    }

    #[test]
    fn test_missing_embeddings_and_stats() {
        let conn = setup_test_connection();
        let a = store_obs(&conn, "p1", "first");
        let b = store_obs(&conn, "p1", "second");
        put_embedding_sync(&conn, a, &le_bytes(&[1.0]), "m", 1).unwrap();

        let missing = observations_missing_embeddings_sync(&conn, 10).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, b);

        let stats = embedding_stats_sync(&conn).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.embedded, 1);
        assert!((stats.percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_on_empty_db() {
        let conn = setup_test_connection();
        let stats = embedding_stats_sync(&conn).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.embedded, 0);
        assert!((stats.percent - 0.0).abs() < f64::EPSILON);
    }
}
