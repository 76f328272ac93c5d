// src/db/observations.rs
// Observation storage: create with redaction and categorization, dedup,
// access tracking, staleness, timeline, keyset pagination, consolidation

use crate::categorize::{categorize, CategorizeInput};
use crate::db::types::{dedup_window_ms, Observation};
use crate::error::{MemoryError, Result};
use crate::redact::{redact, redact_opt};
use crate::utils::{estimate_tokens, now_pair};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

/// Maximum field sizes; oversize input is a validation failure.
pub const MAX_PROJECT_LEN: usize = 200;
pub const MAX_TITLE_LEN: usize = 500;
pub const MAX_TEXT_LEN: usize = 100_000;

/// Maximum ids accepted by a single batched UPDATE.
const MAX_BATCH_IDS: usize = 500;

/// Column list shared by every observation SELECT.
pub(crate) const OBS_COLUMNS: &str = "id, session_id, project, type, title, subtitle, text, \
     narrative, facts, concepts, files_read, files_modified, prompt_number, content_hash, \
     discovery_tokens, auto_category, last_accessed_epoch, stale, created_at, created_at_epoch";

/// Map a row in OBS_COLUMNS order to an Observation.
pub(crate) fn observation_from_row(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        project: row.get(2)?,
        obs_type: row.get(3)?,
        title: row.get(4)?,
        subtitle: row.get(5)?,
        text: row.get(6)?,
        narrative: row.get(7)?,
        facts: row.get(8)?,
        concepts: row.get(9)?,
        files_read: row.get(10)?,
        files_modified: row.get(11)?,
        prompt_number: row.get(12)?,
        content_hash: row.get(13)?,
        discovery_tokens: row.get(14)?,
        auto_category: row.get(15)?,
        last_accessed_epoch: row.get(16)?,
        stale: row.get::<_, i64>(17)? != 0,
        created_at: row.get(18)?,
        created_at_epoch: row.get(19)?,
    })
}

/// Parameters for storing a new observation.
#[derive(Debug, Clone, Default)]
pub struct NewObservation {
    pub session_id: String,
    pub project: String,
    pub obs_type: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub text: Option<String>,
    pub narrative: Option<String>,
    pub facts: Option<String>,
    pub concepts: Option<String>,
    pub files_read: Option<String>,
    pub files_modified: Option<String>,
    pub prompt_number: i64,
    /// Precomputed content hash; computed from
    /// sha256(project|type|title|narrative) when absent.
    pub content_hash: Option<String>,
    /// Precomputed token estimate; derived from text length when absent.
    pub discovery_tokens: Option<i64>,
}

/// Content hash over the semantic identity of an observation.
///
/// Deliberately excludes the session id and timestamp so dedup is stable
/// across invocations.
pub fn content_hash(project: &str, obs_type: &str, title: &str, narrative: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project.as_bytes());
    hasher.update(b"|");
    hasher.update(obs_type.as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(narrative.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// True iff any row with this content hash was created within the last
/// `window_ms` milliseconds. A pre-insert read: races are acceptable (at
/// worst a duplicate slips through and is consolidated later).
pub fn is_duplicate_sync(
    conn: &Connection,
    hash: &str,
    window_ms: i64,
) -> rusqlite::Result<bool> {
    let cutoff = chrono::Utc::now().timestamp_millis() - window_ms;
    let hit: Option<i64> = conn
        .query_row(
            "SELECT id FROM observations
             WHERE content_hash = ?1 AND created_at_epoch > ?2
             LIMIT 1",
            params![hash, cutoff],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Window-less existence probe on content hash (import dedup).
pub fn content_hash_exists_sync(conn: &Connection, hash: &str) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .prepare_cached("SELECT id FROM observations WHERE content_hash = ? LIMIT 1")?
        .query_row([hash], |row| row.get(0))
        .optional()?;
    Ok(hit.is_some())
}

/// Store an observation: redact, categorize, dedup-check, insert.
///
/// Returns the new row id, or -1 when an identical observation landed within
/// the per-type dedup window (silent success, not an error).
pub fn store_observation_sync(conn: &Connection, obs: NewObservation) -> Result<i64> {
    validate(&obs)?;

    // Redaction happens before hashing so the stored hash matches the
    // stored (scrubbed) content and re-ingesting scrubbed exports dedups.
    let title = redact(&obs.title);
    let text = redact_opt(obs.text.as_deref());
    let narrative = redact_opt(obs.narrative.as_deref());

    let hash = obs
        .content_hash
        .unwrap_or_else(|| content_hash(&obs.project, &obs.obs_type, &title, narrative.as_deref()));

    if is_duplicate_sync(conn, &hash, dedup_window_ms(&obs.obs_type))? {
        tracing::debug!(hash = %hash, "Duplicate observation within dedup window, skipping");
        return Ok(-1);
    }

    let category = categorize(&CategorizeInput {
        obs_type: &obs.obs_type,
        title: &title,
        text: text.as_deref(),
        narrative: narrative.as_deref(),
        concepts: obs.concepts.as_deref(),
        files_modified: obs.files_modified.as_deref(),
        files_read: obs.files_read.as_deref(),
    });

    let discovery_tokens = obs
        .discovery_tokens
        .unwrap_or_else(|| estimate_tokens(text.as_deref().unwrap_or("")));

    let (created_at, created_at_epoch) = now_pair();

    conn.execute(
        "INSERT INTO observations (session_id, project, type, title, subtitle, text, narrative,
         facts, concepts, files_read, files_modified, prompt_number, content_hash,
         discovery_tokens, auto_category, created_at, created_at_epoch)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            obs.session_id,
            obs.project,
            obs.obs_type,
            title,
            obs.subtitle,
            text,
            narrative,
            obs.facts,
            obs.concepts,
            obs.files_read,
            obs.files_modified,
            obs.prompt_number,
            hash,
            discovery_tokens,
            category.to_string(),
            created_at,
            created_at_epoch,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

fn validate(obs: &NewObservation) -> Result<()> {
    if obs.project.is_empty() || obs.project.len() > MAX_PROJECT_LEN {
        return Err(MemoryError::InvalidInput(format!(
            "project must be 1..={} chars",
            MAX_PROJECT_LEN
        )));
    }
    if obs.title.is_empty() || obs.title.len() > MAX_TITLE_LEN {
        return Err(MemoryError::InvalidInput(format!(
            "title must be 1..={} chars",
            MAX_TITLE_LEN
        )));
    }
    if obs.obs_type.is_empty() {
        return Err(MemoryError::InvalidInput("type must not be empty".into()));
    }
    if let Some(text) = &obs.text {
        if text.len() > MAX_TEXT_LEN {
            return Err(MemoryError::InvalidInput(format!(
                "text exceeds {} chars",
                MAX_TEXT_LEN
            )));
        }
    }
    Ok(())
}

/// Fetch one observation by id.
pub fn get_observation_sync(conn: &Connection, id: i64) -> rusqlite::Result<Option<Observation>> {
    conn.prepare_cached(&format!(
        "SELECT {OBS_COLUMNS} FROM observations WHERE id = ?"
    ))?
    .query_row([id], observation_from_row)
    .optional()
}

/// Fetch a batch of observations by id. Missing ids are silently absent.
pub fn observations_by_ids_sync(
    conn: &Connection,
    ids: &[i64],
) -> rusqlite::Result<Vec<Observation>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {OBS_COLUMNS} FROM observations WHERE id IN ({})",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let values: Vec<&dyn rusqlite::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
    let rows = stmt.query_map(values.as_slice(), observation_from_row)?;
    rows.collect()
}

/// Delete an observation. Its embedding goes with it (FK cascade) and the
/// FTS mirror is updated by trigger.
pub fn delete_observation_sync(conn: &Connection, id: i64) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM observations WHERE id = ?", [id])
}

/// Filter a caller-supplied id batch: positive ids only, capped.
fn sanitize_ids(ids: &[i64]) -> Vec<i64> {
    ids.iter()
        .copied()
        .filter(|id| *id > 0)
        .take(MAX_BATCH_IDS)
        .collect()
}

/// Build "?,?,?" for a params slice.
fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

/// Record access time for a batch of observations in one UPDATE.
/// Non-positive ids are ignored; at most 500 ids per call.
pub fn update_last_accessed_sync(conn: &Connection, ids: &[i64]) -> rusqlite::Result<usize> {
    let ids = sanitize_ids(ids);
    if ids.is_empty() {
        return Ok(0);
    }
    let now = chrono::Utc::now().timestamp_millis();
    let sql = format!(
        "UPDATE observations SET last_accessed_epoch = ? WHERE id IN ({})",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut values: Vec<&dyn rusqlite::ToSql> = vec![&now];
    for id in &ids {
        values.push(id);
    }
    stmt.execute(values.as_slice())
}

/// Set or clear the stale flag for a batch of observations.
/// Same id validation rules as `update_last_accessed_sync`.
pub fn mark_stale_sync(conn: &Connection, ids: &[i64], stale: bool) -> rusqlite::Result<usize> {
    let ids = sanitize_ids(ids);
    if ids.is_empty() {
        return Ok(0);
    }
    let flag = stale as i64;
    let sql = format!(
        "UPDATE observations SET stale = ? WHERE id IN ({})",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut values: Vec<&dyn rusqlite::ToSql> = vec![&flag];
    for id in &ids {
        values.push(id);
    }
    stmt.execute(values.as_slice())
}

/// Most recent observations for a project in (created_at_epoch, id) DESC order.
pub fn recent_observations_sync(
    conn: &Connection,
    project: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Observation>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {OBS_COLUMNS} FROM observations
         WHERE project = ?
         ORDER BY created_at_epoch DESC, id DESC
         LIMIT ?"
    ))?;
    let rows = stmt.query_map(params![project, limit as i64], observation_from_row)?;
    rows.collect()
}

/// Most recent observations carrying a non-empty files_modified list,
/// for stale detection.
pub fn recent_with_files_modified_sync(
    conn: &Connection,
    project: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Observation>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {OBS_COLUMNS} FROM observations
         WHERE project = ? AND files_modified IS NOT NULL AND files_modified != ''
         ORDER BY created_at_epoch DESC, id DESC
         LIMIT ?"
    ))?;
    let rows = stmt.query_map(params![project, limit as i64], observation_from_row)?;
    rows.collect()
}

// ---------------------------------------------------------------------------
// Keyset pagination
// ---------------------------------------------------------------------------

/// Encode a keyset cursor: base64url("epoch:id"), no padding.
pub fn encode_cursor(epoch: i64, id: i64) -> String {
    URL_SAFE_NO_PAD.encode(format!("{epoch}:{id}"))
}

/// Decode a keyset cursor. Malformed cursors are a validation failure.
pub fn decode_cursor(cursor: &str) -> Result<(i64, i64)> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| MemoryError::InvalidInput(format!("malformed cursor: {cursor}")))?;
    let decoded = String::from_utf8(bytes)
        .map_err(|_| MemoryError::InvalidInput(format!("malformed cursor: {cursor}")))?;
    let (epoch, id) = decoded
        .split_once(':')
        .ok_or_else(|| MemoryError::InvalidInput(format!("malformed cursor: {cursor}")))?;
    let epoch = epoch
        .parse()
        .map_err(|_| MemoryError::InvalidInput(format!("malformed cursor: {cursor}")))?;
    let id = id
        .parse()
        .map_err(|_| MemoryError::InvalidInput(format!("malformed cursor: {cursor}")))?;
    Ok((epoch, id))
}

/// One keyset page plus the cursor for the next one.
#[derive(Debug, Clone)]
pub struct ObservationPage {
    pub items: Vec<Observation>,
    pub next_cursor: Option<String>,
}

/// Fetch a page in strict (created_at_epoch DESC, id DESC) order.
///
/// The row-value comparison against the cursor keeps pagination stable under
/// concurrent inserts: rows inserted at epochs below the cursor are simply
/// seen on a later page, never duplicated.
pub fn observations_page_sync(
    conn: &Connection,
    project: &str,
    cursor: Option<&str>,
    limit: usize,
) -> Result<ObservationPage> {
    let limit = limit.max(1);
    let items: Vec<Observation> = match cursor {
        Some(cursor) => {
            let (epoch, id) = decode_cursor(cursor)?;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {OBS_COLUMNS} FROM observations
                 WHERE project = ? AND (created_at_epoch, id) < (?, ?)
                 ORDER BY created_at_epoch DESC, id DESC
                 LIMIT ?"
            ))?;
            let rows = stmt.query_map(
                params![project, epoch, id, limit as i64],
                observation_from_row,
            )?;
            rows.collect::<rusqlite::Result<_>>()?
        }
        None => recent_observations_sync(conn, project, limit)?,
    };

    let next_cursor = if items.len() == limit {
        items
            .last()
            .map(|o| encode_cursor(o.created_at_epoch, o.id))
    } else {
        None
    };

    Ok(ObservationPage { items, next_cursor })
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// Observations around an anchor: `before` strictly-older rows (oldest
/// first), the anchor, then `after` strictly-newer rows. Ordering ties break
/// by id so the sequence is total.
pub fn timeline_sync(
    conn: &Connection,
    anchor_id: i64,
    before: usize,
    after: usize,
) -> Result<Vec<Observation>> {
    let anchor = get_observation_sync(conn, anchor_id)?
        .ok_or_else(|| MemoryError::InvalidInput(format!("no observation {anchor_id}")))?;

    let mut older: Vec<Observation> = {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {OBS_COLUMNS} FROM observations
             WHERE (created_at_epoch, id) < (?, ?)
             ORDER BY created_at_epoch DESC, id DESC
             LIMIT ?"
        ))?;
        let rows = stmt.query_map(
            params![anchor.created_at_epoch, anchor.id, before as i64],
            observation_from_row,
        )?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    older.reverse();

    let newer: Vec<Observation> = {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {OBS_COLUMNS} FROM observations
             WHERE (created_at_epoch, id) > (?, ?)
             ORDER BY created_at_epoch ASC, id ASC
             LIMIT ?"
        ))?;
        let rows = stmt.query_map(
            params![anchor.created_at_epoch, anchor.id, after as i64],
            observation_from_row,
        )?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut result = older;
    result.push(anchor);
    result.extend(newer);
    Ok(result)
}

// ---------------------------------------------------------------------------
// Consolidation
// ---------------------------------------------------------------------------

/// Options for consolidation.
#[derive(Debug, Clone, Copy)]
pub struct ConsolidateOptions {
    pub min_group_size: usize,
    pub dry_run: bool,
}

impl Default for ConsolidateOptions {
    fn default() -> Self {
        Self {
            min_group_size: 3,
            dry_run: false,
        }
    }
}

/// Consolidation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ConsolidateResult {
    pub merged: usize,
    pub removed: usize,
}

/// Merge groups of observations sharing (type, files_modified).
///
/// In each group of at least `min_group_size` members, the newest row
/// (greatest created_at_epoch, ties by greater id) becomes the keeper. The
/// keeper absorbs the unique non-empty texts of the whole group joined by
/// `\n---\n` (truncated to the text limit), gets a `[consolidated xN] `
/// title prefix, and the other rows are deleted along with their embeddings
/// (FK cascade). The entire operation is one transaction.
pub fn consolidate_sync(
    conn: &Connection,
    project: &str,
    opts: ConsolidateOptions,
) -> Result<ConsolidateResult> {
    let min_group_size = opts.min_group_size.max(2);

    let groups: Vec<(String, String)> = {
        let mut stmt = conn.prepare_cached(
            "SELECT type, files_modified FROM observations
             WHERE project = ?1
               AND files_modified IS NOT NULL AND files_modified != ''
             GROUP BY type, files_modified
             HAVING COUNT(*) >= ?2",
        )?;
        let rows = stmt.query_map(params![project, min_group_size as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    if groups.is_empty() {
        return Ok(ConsolidateResult {
            merged: 0,
            removed: 0,
        });
    }

    let tx = conn.unchecked_transaction()?;
    let mut merged = 0;
    let mut removed = 0;

    for (obs_type, files_modified) in &groups {
        // Oldest first so the merged text reads chronologically;
        // the keeper is the last row in this ordering.
        let members: Vec<(i64, String, Option<String>)> = {
            let mut stmt = tx.prepare_cached(
                "SELECT id, title, text FROM observations
                 WHERE project = ?1 AND type = ?2 AND files_modified = ?3
                 ORDER BY created_at_epoch ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![project, obs_type, files_modified], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        if members.len() < min_group_size {
            continue;
        }

        let group_size = members.len();
        let (keeper_id, keeper_title, _) = members
            .last()
            .cloned()
            .ok_or_else(|| MemoryError::Other("empty consolidation group".into()))?;

        if opts.dry_run {
            merged += 1;
            removed += group_size - 1;
            continue;
        }

        let mut seen = std::collections::HashSet::new();
        let mut texts: Vec<&str> = Vec::new();
        for (_, _, text) in &members {
            if let Some(t) = text.as_deref() {
                if !t.is_empty() && seen.insert(t) {
                    texts.push(t);
                }
            }
        }
        let mut combined = texts.join("\n---\n");
        if combined.len() > MAX_TEXT_LEN {
            combined = crate::utils::truncate_at_boundary(&combined, MAX_TEXT_LEN).to_string();
        }

        let new_title = format!("[consolidated x{group_size}] {keeper_title}");
        tx.execute(
            "UPDATE observations SET title = ?1, text = ?2 WHERE id = ?3",
            params![new_title, combined, keeper_id],
        )?;

        let loser_ids: Vec<i64> = members[..group_size - 1].iter().map(|(id, _, _)| *id).collect();
        let sql = format!(
            "DELETE FROM observations WHERE id IN ({})",
            placeholders(loser_ids.len())
        );
        let mut stmt = tx.prepare(&sql)?;
        let values: Vec<&dyn rusqlite::ToSql> =
            loser_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        stmt.execute(values.as_slice())?;

        merged += 1;
        removed += loser_ids.len();
    }

    if opts.dry_run {
        // Nothing was written; drop the transaction
        tx.rollback()?;
    } else {
        tx.commit()?;
        if merged > 0 {
            tracing::info!(project, merged, removed, "Consolidated observation groups");
        }
    }

    Ok(ConsolidateResult { merged, removed })
}
