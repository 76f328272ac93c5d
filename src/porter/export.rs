// src/porter/export.rs
// Streaming JSONL export: meta line first, then each family scanned in
// (created_at_epoch ASC, id ASC) batches through a caller-provided writer

use crate::db::observations::{observation_from_row, OBS_COLUMNS};
use crate::db::pool::DatabasePool;
use crate::db::sessions::{prompt_from_row, summary_from_row, PROMPT_COLUMNS, SUMMARY_COLUMNS};
use crate::db::types::{Observation, Prompt, Summary};
use crate::error::Result;
use crate::porter::{
    ExportCounts, ExportFilters, ExportMeta, SCHEMA_VERSION, TYPE_OBSERVATION, TYPE_PROMPT,
    TYPE_SUMMARY,
};
use rusqlite::{params, Connection};
use std::sync::Arc;

/// Rows fetched per batch while streaming.
const EXPORT_BATCH: usize = 200;

/// Export restrictions.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub project: Option<String>,
}

/// Counts written out, echoed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportStats {
    pub observations: i64,
    pub summaries: i64,
    pub prompts: i64,
}

/// Serialize an entity with its `_type` tag injected.
fn tagged_line<T: serde::Serialize>(record: &T, tag: &str) -> Result<String> {
    let mut value = serde_json::to_value(record)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("_type".to_string(), serde_json::Value::from(tag));
    }
    Ok(serde_json::to_string(&value)?)
}

/// Export observations, summaries and prompts as JSONL.
///
/// The writer callback receives one complete line (without trailing
/// newline) at a time; it is the caller's stream, so a writer error aborts
/// the export. Counts for the `_meta` first line are pre-computed.
pub async fn export_jsonl<W>(
    pool: &Arc<DatabasePool>,
    opts: &ExportOptions,
    mut writer: W,
) -> Result<ExportStats>
where
    W: FnMut(&str) -> std::io::Result<()>,
{
    let project = opts.project.clone();
    let counts = pool
        .run(move |conn| family_counts(conn, project.as_deref()))
        .await?;

    let meta = ExportMeta {
        version: SCHEMA_VERSION.to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        counts,
        filters: opts.project.as_ref().map(|p| ExportFilters {
            project: Some(p.clone()),
        }),
    };
    let meta_line = serde_json::to_string(&serde_json::json!({ "_meta": meta }))?;
    writer(&meta_line)?;

    // Observations
    let mut cursor: Option<(i64, i64)> = None;
    loop {
        let project = opts.project.clone();
        let batch: Vec<Observation> = pool
            .run(move |conn| scan_observations(conn, project.as_deref(), cursor, EXPORT_BATCH))
            .await?;
        if batch.is_empty() {
            break;
        }
        cursor = batch.last().map(|o| (o.created_at_epoch, o.id));
        for record in &batch {
            writer(&tagged_line(record, TYPE_OBSERVATION)?)?;
        }
    }

    // Summaries
    let mut cursor: Option<(i64, i64)> = None;
    loop {
        let project = opts.project.clone();
        let batch: Vec<Summary> = pool
            .run(move |conn| scan_summaries(conn, project.as_deref(), cursor, EXPORT_BATCH))
            .await?;
        if batch.is_empty() {
            break;
        }
        cursor = batch.last().map(|s| (s.created_at_epoch, s.id));
        for record in &batch {
            writer(&tagged_line(record, TYPE_SUMMARY)?)?;
        }
    }

    // Prompts
    let mut cursor: Option<(i64, i64)> = None;
    loop {
        let project = opts.project.clone();
        let batch: Vec<Prompt> = pool
            .run(move |conn| scan_prompts(conn, project.as_deref(), cursor, EXPORT_BATCH))
            .await?;
        if batch.is_empty() {
            break;
        }
        cursor = batch.last().map(|p| (p.created_at_epoch, p.id));
        for record in &batch {
            writer(&tagged_line(record, TYPE_PROMPT)?)?;
        }
    }

    tracing::info!(
        observations = counts.observations,
        summaries = counts.summaries,
        prompts = counts.prompts,
        "Export complete"
    );

    Ok(ExportStats {
        observations: counts.observations,
        summaries: counts.summaries,
        prompts: counts.prompts,
    })
}

fn family_counts(conn: &Connection, project: Option<&str>) -> rusqlite::Result<ExportCounts> {
    let observations = conn.query_row(
        "SELECT COUNT(*) FROM observations WHERE ?1 IS NULL OR project = ?1",
        params![project],
        |r| r.get(0),
    )?;
    let summaries = conn.query_row(
        "SELECT COUNT(*) FROM summaries WHERE ?1 IS NULL OR project = ?1",
        params![project],
        |r| r.get(0),
    )?;
    let prompts = conn.query_row(
        "SELECT COUNT(*) FROM prompts WHERE ?1 IS NULL OR project = ?1",
        params![project],
        |r| r.get(0),
    )?;
    Ok(ExportCounts {
        observations,
        summaries,
        prompts,
    })
}

fn scan_observations(
    conn: &Connection,
    project: Option<&str>,
    after: Option<(i64, i64)>,
    limit: usize,
) -> rusqlite::Result<Vec<Observation>> {
    let (epoch, id) = after.unwrap_or((i64::MIN, i64::MIN));
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {OBS_COLUMNS} FROM observations
         WHERE (?1 IS NULL OR project = ?1) AND (created_at_epoch, id) > (?2, ?3)
         ORDER BY created_at_epoch ASC, id ASC
         LIMIT ?4"
    ))?;
    let rows = stmt.query_map(params![project, epoch, id, limit as i64], observation_from_row)?;
    rows.collect()
}

fn scan_summaries(
    conn: &Connection,
    project: Option<&str>,
    after: Option<(i64, i64)>,
    limit: usize,
) -> rusqlite::Result<Vec<Summary>> {
    let (epoch, id) = after.unwrap_or((i64::MIN, i64::MIN));
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM summaries
         WHERE (?1 IS NULL OR project = ?1) AND (created_at_epoch, id) > (?2, ?3)
         ORDER BY created_at_epoch ASC, id ASC
         LIMIT ?4"
    ))?;
    let rows = stmt.query_map(params![project, epoch, id, limit as i64], summary_from_row)?;
    rows.collect()
}

fn scan_prompts(
    conn: &Connection,
    project: Option<&str>,
    after: Option<(i64, i64)>,
    limit: usize,
) -> rusqlite::Result<Vec<Prompt>> {
    let (epoch, id) = after.unwrap_or((i64::MIN, i64::MIN));
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PROMPT_COLUMNS} FROM prompts
         WHERE (?1 IS NULL OR project = ?1) AND (created_at_epoch, id) > (?2, ?3)
         ORDER BY created_at_epoch ASC, id ASC
         LIMIT ?4"
    ))?;
    let rows = stmt.query_map(params![project, epoch, id, limit as i64], prompt_from_row)?;
    rows.collect()
}
