// src/porter/import.rs
// Batched JSONL import with per-family dedup
//
// Lines are parsed and validated up front (no database involved); accepted
// records then insert in batches of up to 100 per family, one transaction
// per batch. Dedup keys: observations by content_hash, summaries by
// (session_id, project, created_at_epoch), prompts by
// (content_session_id, prompt_number).

use crate::categorize::{categorize, CategorizeInput};
use crate::db::observations::{content_hash, content_hash_exists_sync};
use crate::db::pool::DatabasePool;
use crate::db::sessions::{prompt_exists_sync, summary_exists_sync};
use crate::error::Result;
use crate::porter::{TYPE_OBSERVATION, TYPE_PROMPT, TYPE_SUMMARY};
use crate::redact::{redact, redact_opt};
use crate::utils::{estimate_tokens, now_pair};
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Accepted records per family per transaction.
const IMPORT_BATCH: usize = 100;

/// Import options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Count what would be imported vs skipped without writing.
    pub dry_run: bool,
}

/// Import outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total: usize,
    pub error_details: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ObservationRecord {
    #[serde(default)]
    session_id: String,
    project: String,
    #[serde(rename = "type")]
    obs_type: String,
    title: String,
    subtitle: Option<String>,
    text: Option<String>,
    narrative: Option<String>,
    facts: Option<String>,
    concepts: Option<String>,
    files_read: Option<String>,
    files_modified: Option<String>,
    #[serde(default)]
    prompt_number: i64,
    content_hash: Option<String>,
    discovery_tokens: Option<i64>,
    auto_category: Option<String>,
    last_accessed_epoch: Option<i64>,
    #[serde(default)]
    stale: bool,
    created_at: Option<String>,
    created_at_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SummaryRecord {
    session_id: String,
    project: String,
    request: Option<String>,
    investigated: Option<String>,
    learned: Option<String>,
    completed: Option<String>,
    next_steps: Option<String>,
    notes: Option<String>,
    created_at: Option<String>,
    created_at_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PromptRecord {
    #[serde(alias = "session_id")]
    content_session_id: String,
    prompt_number: i64,
    text: String,
    project: Option<String>,
    created_at: Option<String>,
    created_at_epoch: Option<i64>,
}

/// A record's stored timestamp pair, preserved from the export when present.
fn timestamp_pair(created_at: Option<String>, created_at_epoch: Option<i64>) -> (String, i64) {
    match (created_at, created_at_epoch) {
        (Some(iso), Some(epoch)) => (iso, epoch),
        (None, Some(epoch)) => (crate::utils::epoch_to_iso(epoch), epoch),
        (Some(iso), None) => {
            let epoch = chrono::DateTime::parse_from_rfc3339(&iso)
                .map(|dt| dt.timestamp_millis())
                .unwrap_or_else(|_| chrono::Utc::now().timestamp_millis());
            (iso, epoch)
        }
        (None, None) => now_pair(),
    }
}

fn short_excerpt(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.len() <= 60 {
        trimmed.to_string()
    } else {
        format!("{}...", crate::utils::truncate_at_boundary(trimmed, 60))
    }
}

/// Import JSONL lines.
///
/// Blank lines and lines starting with `#` are skipped; a `_meta` record is
/// tolerated anywhere and not counted. Invalid JSON or a record failing
/// family validation counts as an error with its line number reported.
pub async fn import_jsonl<I>(
    pool: &Arc<DatabasePool>,
    lines: I,
    opts: ImportOptions,
) -> Result<ImportReport>
where
    I: IntoIterator<Item = String>,
{
    let mut report = ImportReport::default();
    let mut observations: Vec<ObservationRecord> = Vec::new();
    let mut summaries: Vec<SummaryRecord> = Vec::new();
    let mut prompts: Vec<PromptRecord> = Vec::new();

    for (index, line) in lines.into_iter().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                report.errors += 1;
                report
                    .error_details
                    .push(format!("line {line_no}: invalid JSON ({e}): {}", short_excerpt(trimmed)));
                continue;
            }
        };

        if value.get("_meta").is_some() {
            continue;
        }

        let record_type = value.get("_type").and_then(|t| t.as_str()).unwrap_or("");
        match record_type {
            TYPE_OBSERVATION => match serde_json::from_value::<ObservationRecord>(value) {
                Ok(rec) if !rec.project.is_empty() && !rec.title.is_empty() && !rec.obs_type.is_empty() => {
                    observations.push(rec);
                }
                Ok(_) => {
                    report.errors += 1;
                    report.error_details.push(format!(
                        "line {line_no}: observation missing project/type/title"
                    ));
                }
                Err(e) => {
                    report.errors += 1;
                    report
                        .error_details
                        .push(format!("line {line_no}: invalid observation ({e})"));
                }
            },
            TYPE_SUMMARY => match serde_json::from_value::<SummaryRecord>(value) {
                Ok(rec) if !rec.session_id.is_empty() && !rec.project.is_empty() => {
                    summaries.push(rec);
                }
                Ok(_) => {
                    report.errors += 1;
                    report
                        .error_details
                        .push(format!("line {line_no}: summary missing session_id/project"));
                }
                Err(e) => {
                    report.errors += 1;
                    report
                        .error_details
                        .push(format!("line {line_no}: invalid summary ({e})"));
                }
            },
            TYPE_PROMPT => match serde_json::from_value::<PromptRecord>(value) {
                Ok(rec) if !rec.content_session_id.is_empty() && !rec.text.is_empty() => {
                    prompts.push(rec);
                }
                Ok(_) => {
                    report.errors += 1;
                    report
                        .error_details
                        .push(format!("line {line_no}: prompt missing session/text"));
                }
                Err(e) => {
                    report.errors += 1;
                    report
                        .error_details
                        .push(format!("line {line_no}: invalid prompt ({e})"));
                }
            },
            other => {
                report.errors += 1;
                report.error_details.push(format!(
                    "line {line_no}: unknown _type {:?}: {}",
                    other,
                    short_excerpt(trimmed)
                ));
            }
        }
    }

    report.total = report.errors + observations.len() + summaries.len() + prompts.len();

    // In-file dedup keys are tracked across batches so a record duplicated
    // within one export file is skipped, not double-imported.
    let mut seen_hashes: HashSet<String> = HashSet::new();
    for batch in observations.chunks(IMPORT_BATCH) {
        let records: Vec<PreparedObservation> = batch
            .iter()
            .map(|rec| prepare_observation(rec, &mut seen_hashes))
            .collect();
        let dry_run = opts.dry_run;
        let (imported, skipped) = pool
            .run(move |conn| import_observation_batch(conn, &records, dry_run))
            .await?;
        report.imported += imported;
        report.skipped += skipped;
    }

    let mut seen_summaries: HashSet<(String, String, i64)> = HashSet::new();
    for batch in summaries.chunks(IMPORT_BATCH) {
        let records: Vec<PreparedSummary> = batch
            .iter()
            .map(|rec| prepare_summary(rec, &mut seen_summaries))
            .collect();
        let dry_run = opts.dry_run;
        let (imported, skipped) = pool
            .run(move |conn| import_summary_batch(conn, &records, dry_run))
            .await?;
        report.imported += imported;
        report.skipped += skipped;
    }

    let mut seen_prompts: HashSet<(String, i64)> = HashSet::new();
    for batch in prompts.chunks(IMPORT_BATCH) {
        let records: Vec<PreparedPrompt> = batch
            .iter()
            .map(|rec| prepare_prompt(rec, &mut seen_prompts))
            .collect();
        let dry_run = opts.dry_run;
        let (imported, skipped) = pool
            .run(move |conn| import_prompt_batch(conn, &records, dry_run))
            .await?;
        report.imported += imported;
        report.skipped += skipped;
    }

    tracing::info!(
        imported = report.imported,
        skipped = report.skipped,
        errors = report.errors,
        dry_run = opts.dry_run,
        "Import complete"
    );

    Ok(report)
}

// ---------------------------------------------------------------------------
// Prepared (validated + scrubbed) records
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct PreparedObservation {
    session_id: String,
    project: String,
    obs_type: String,
    title: String,
    subtitle: Option<String>,
    text: Option<String>,
    narrative: Option<String>,
    facts: Option<String>,
    concepts: Option<String>,
    files_read: Option<String>,
    files_modified: Option<String>,
    prompt_number: i64,
    hash: String,
    discovery_tokens: i64,
    auto_category: String,
    last_accessed_epoch: Option<i64>,
    stale: bool,
    created_at: String,
    created_at_epoch: i64,
    /// Duplicate of an earlier record in this same file.
    seen_in_file: bool,
}

fn prepare_observation(
    rec: &ObservationRecord,
    seen: &mut HashSet<String>,
) -> PreparedObservation {
    // Redaction is idempotent: re-importing a scrubbed export is unchanged
    let title = redact(&rec.title);
    let text = redact_opt(rec.text.as_deref());
    let narrative = redact_opt(rec.narrative.as_deref());

    let hash = rec.content_hash.clone().unwrap_or_else(|| {
        content_hash(&rec.project, &rec.obs_type, &title, narrative.as_deref())
    });

    let auto_category = rec.auto_category.clone().unwrap_or_else(|| {
        categorize(&CategorizeInput {
            obs_type: &rec.obs_type,
            title: &title,
            text: text.as_deref(),
            narrative: narrative.as_deref(),
            concepts: rec.concepts.as_deref(),
            files_modified: rec.files_modified.as_deref(),
            files_read: rec.files_read.as_deref(),
        })
        .to_string()
    });

    let discovery_tokens = rec
        .discovery_tokens
        .unwrap_or_else(|| estimate_tokens(text.as_deref().unwrap_or("")));

    let (created_at, created_at_epoch) =
        timestamp_pair(rec.created_at.clone(), rec.created_at_epoch);

    let seen_in_file = !seen.insert(hash.clone());

    PreparedObservation {
        session_id: rec.session_id.clone(),
        project: rec.project.clone(),
        obs_type: rec.obs_type.clone(),
        title,
        subtitle: rec.subtitle.clone(),
        text,
        narrative,
        facts: rec.facts.clone(),
        concepts: rec.concepts.clone(),
        files_read: rec.files_read.clone(),
        files_modified: rec.files_modified.clone(),
        prompt_number: rec.prompt_number,
        hash,
        discovery_tokens,
        auto_category,
        last_accessed_epoch: rec.last_accessed_epoch,
        stale: rec.stale,
        created_at,
        created_at_epoch,
        seen_in_file,
    }
}

fn import_observation_batch(
    conn: &Connection,
    records: &[PreparedObservation],
    dry_run: bool,
) -> Result<(usize, usize)> {
    let tx = conn.unchecked_transaction()?;
    let mut imported = 0;
    let mut skipped = 0;

    for rec in records {
        if rec.seen_in_file || content_hash_exists_sync(&tx, &rec.hash)? {
            skipped += 1;
            continue;
        }
        if !dry_run {
            tx.execute(
                "INSERT INTO observations (session_id, project, type, title, subtitle, text,
                 narrative, facts, concepts, files_read, files_modified, prompt_number,
                 content_hash, discovery_tokens, auto_category, last_accessed_epoch, stale,
                 created_at, created_at_epoch)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    rec.session_id,
                    rec.project,
                    rec.obs_type,
                    rec.title,
                    rec.subtitle,
                    rec.text,
                    rec.narrative,
                    rec.facts,
                    rec.concepts,
                    rec.files_read,
                    rec.files_modified,
                    rec.prompt_number,
                    rec.hash,
                    rec.discovery_tokens,
                    rec.auto_category,
                    rec.last_accessed_epoch,
                    rec.stale as i64,
                    rec.created_at,
                    rec.created_at_epoch,
                ],
            )?;
        }
        imported += 1;
    }

    if dry_run {
        tx.rollback()?;
    } else {
        tx.commit()?;
    }
    Ok((imported, skipped))
}

#[derive(Clone)]
struct PreparedSummary {
    session_id: String,
    project: String,
    request: Option<String>,
    investigated: Option<String>,
    learned: Option<String>,
    completed: Option<String>,
    next_steps: Option<String>,
    notes: Option<String>,
    created_at: String,
    created_at_epoch: i64,
    seen_in_file: bool,
}

fn prepare_summary(
    rec: &SummaryRecord,
    seen: &mut HashSet<(String, String, i64)>,
) -> PreparedSummary {
    let (created_at, created_at_epoch) =
        timestamp_pair(rec.created_at.clone(), rec.created_at_epoch);
    let key = (rec.session_id.clone(), rec.project.clone(), created_at_epoch);
    let seen_in_file = !seen.insert(key);

    PreparedSummary {
        session_id: rec.session_id.clone(),
        project: rec.project.clone(),
        request: rec.request.clone(),
        investigated: rec.investigated.clone(),
        learned: rec.learned.clone(),
        completed: rec.completed.clone(),
        next_steps: rec.next_steps.clone(),
        notes: rec.notes.clone(),
        created_at,
        created_at_epoch,
        seen_in_file,
    }
}

fn import_summary_batch(
    conn: &Connection,
    records: &[PreparedSummary],
    dry_run: bool,
) -> Result<(usize, usize)> {
    let tx = conn.unchecked_transaction()?;
    let mut imported = 0;
    let mut skipped = 0;

    for rec in records {
        if rec.seen_in_file
            || summary_exists_sync(&tx, &rec.session_id, &rec.project, rec.created_at_epoch)?
        {
            skipped += 1;
            continue;
        }
        if !dry_run {
            tx.execute(
                "INSERT INTO summaries (session_id, project, request, investigated, learned,
                 completed, next_steps, notes, created_at, created_at_epoch)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    rec.session_id,
                    rec.project,
                    rec.request,
                    rec.investigated,
                    rec.learned,
                    rec.completed,
                    rec.next_steps,
                    rec.notes,
                    rec.created_at,
                    rec.created_at_epoch,
                ],
            )?;
        }
        imported += 1;
    }

    if dry_run {
        tx.rollback()?;
    } else {
        tx.commit()?;
    }
    Ok((imported, skipped))
}

#[derive(Clone)]
struct PreparedPrompt {
    content_session_id: String,
    prompt_number: i64,
    text: String,
    project: Option<String>,
    created_at: String,
    created_at_epoch: i64,
    seen_in_file: bool,
}

fn prepare_prompt(rec: &PromptRecord, seen: &mut HashSet<(String, i64)>) -> PreparedPrompt {
    let (created_at, created_at_epoch) =
        timestamp_pair(rec.created_at.clone(), rec.created_at_epoch);
    let key = (rec.content_session_id.clone(), rec.prompt_number);
    let seen_in_file = !seen.insert(key);

    PreparedPrompt {
        content_session_id: rec.content_session_id.clone(),
        prompt_number: rec.prompt_number,
        text: rec.text.clone(),
        project: rec.project.clone(),
        created_at,
        created_at_epoch,
        seen_in_file,
    }
}

fn import_prompt_batch(
    conn: &Connection,
    records: &[PreparedPrompt],
    dry_run: bool,
) -> Result<(usize, usize)> {
    let tx = conn.unchecked_transaction()?;
    let mut imported = 0;
    let mut skipped = 0;

    for rec in records {
        if rec.seen_in_file
            || prompt_exists_sync(&tx, &rec.content_session_id, rec.prompt_number)?
        {
            skipped += 1;
            continue;
        }
        if !dry_run {
            tx.execute(
                "INSERT INTO prompts (content_session_id, prompt_number, text, project,
                 created_at, created_at_epoch)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    rec.content_session_id,
                    rec.prompt_number,
                    rec.text,
                    rec.project,
                    rec.created_at,
                    rec.created_at_epoch,
                ],
            )?;
        }
        imported += 1;
    }

    if dry_run {
        tx.rollback()?;
    } else {
        tx.commit()?;
    }
    Ok((imported, skipped))
}
