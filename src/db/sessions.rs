// src/db/sessions.rs
// Session lifecycle, prompts, summaries, checkpoints, project aliases,
// and GitHub cross-references

use crate::db::types::{Checkpoint, GithubLink, ProjectAlias, Prompt, Session, Summary};
use crate::error::{MemoryError, Result};
use crate::utils::now_pair;
use rusqlite::{params, Connection, OptionalExtension};

const SESSION_COLUMNS: &str = "id, content_session_id, project, status, started_at, \
     started_at_epoch, completed_at, completed_at_epoch";

fn session_from_row(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        content_session_id: row.get(1)?,
        project: row.get(2)?,
        status: row.get(3)?,
        started_at: row.get(4)?,
        started_at_epoch: row.get(5)?,
        completed_at: row.get(6)?,
        completed_at_epoch: row.get(7)?,
    })
}

/// Fetch a session by its opaque external id, creating an active one when
/// absent. The project and external id are immutable once set: an existing
/// session is returned as-is even when the caller passes a different project.
pub fn get_or_create_session_sync(
    conn: &Connection,
    content_session_id: &str,
    project: &str,
) -> Result<Session> {
    if content_session_id.is_empty() {
        return Err(MemoryError::InvalidInput("session id must not be empty".into()));
    }

    let existing = conn
        .prepare_cached(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE content_session_id = ?"
        ))?
        .query_row([content_session_id], session_from_row)
        .optional()?;

    if let Some(session) = existing {
        return Ok(session);
    }

    let (started_at, started_at_epoch) = now_pair();
    conn.execute(
        "INSERT INTO sessions (content_session_id, project, status, started_at, started_at_epoch)
         VALUES (?, ?, 'active', ?, ?)",
        params![content_session_id, project, started_at, started_at_epoch],
    )?;
    let id = conn.last_insert_rowid();

    Ok(Session {
        id,
        content_session_id: content_session_id.to_string(),
        project: project.to_string(),
        status: "active".to_string(),
        started_at,
        started_at_epoch,
        completed_at: None,
        completed_at_epoch: None,
    })
}

/// Transition a session to a terminal state ("completed" or "failed").
pub fn complete_session_sync(conn: &Connection, id: i64, status: &str) -> Result<()> {
    if status != "completed" && status != "failed" {
        return Err(MemoryError::InvalidInput(format!(
            "invalid terminal session status: {status}"
        )));
    }
    let (completed_at, completed_at_epoch) = now_pair();
    let updated = conn.execute(
        "UPDATE sessions SET status = ?, completed_at = ?, completed_at_epoch = ?
         WHERE id = ?",
        params![status, completed_at, completed_at_epoch, id],
    )?;
    if updated == 0 {
        return Err(MemoryError::InvalidInput(format!("no session {id}")));
    }
    Ok(())
}

/// Sessions for a project, most recently started first.
pub fn recent_sessions_sync(
    conn: &Connection,
    project: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Session>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE project = ?
         ORDER BY started_at_epoch DESC, id DESC
         LIMIT ?"
    ))?;
    let rows = stmt.query_map(params![project, limit as i64], session_from_row)?;
    rows.collect()
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Fields of a new end-of-session summary.
#[derive(Debug, Clone, Default)]
pub struct NewSummary {
    pub session_id: String,
    pub project: String,
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
}

pub(crate) const SUMMARY_COLUMNS: &str = "id, session_id, project, request, investigated, \
     learned, completed, next_steps, notes, created_at, created_at_epoch";

pub(crate) fn summary_from_row(row: &rusqlite::Row) -> rusqlite::Result<Summary> {
    Ok(Summary {
        id: row.get(0)?,
        session_id: row.get(1)?,
        project: row.get(2)?,
        request: row.get(3)?,
        investigated: row.get(4)?,
        learned: row.get(5)?,
        completed: row.get(6)?,
        next_steps: row.get(7)?,
        notes: row.get(8)?,
        created_at: row.get(9)?,
        created_at_epoch: row.get(10)?,
    })
}

/// Store a session summary. Returns the new id.
pub fn store_summary_sync(conn: &Connection, summary: NewSummary) -> Result<i64> {
    if summary.session_id.is_empty() || summary.project.is_empty() {
        return Err(MemoryError::InvalidInput(
            "summary requires session_id and project".into(),
        ));
    }
    let (created_at, created_at_epoch) = now_pair();
    conn.execute(
        "INSERT INTO summaries (session_id, project, request, investigated, learned, completed,
         next_steps, notes, created_at, created_at_epoch)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            summary.session_id,
            summary.project,
            summary.request,
            summary.investigated,
            summary.learned,
            summary.completed,
            summary.next_steps,
            summary.notes,
            created_at,
            created_at_epoch,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Dedup probe for import: (session_id, project, created_at_epoch).
pub fn summary_exists_sync(
    conn: &Connection,
    session_id: &str,
    project: &str,
    created_at_epoch: i64,
) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .prepare_cached(
            "SELECT id FROM summaries
             WHERE session_id = ? AND project = ? AND created_at_epoch = ?
             LIMIT 1",
        )?
        .query_row(params![session_id, project, created_at_epoch], |row| row.get(0))
        .optional()?;
    Ok(hit.is_some())
}

/// Most recent summaries for a project.
pub fn recent_summaries_sync(
    conn: &Connection,
    project: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Summary>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM summaries
         WHERE project = ?
         ORDER BY created_at_epoch DESC, id DESC
         LIMIT ?"
    ))?;
    let rows = stmt.query_map(params![project, limit as i64], summary_from_row)?;
    rows.collect()
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

pub(crate) const PROMPT_COLUMNS: &str =
    "id, content_session_id, prompt_number, text, project, created_at, created_at_epoch";

pub(crate) fn prompt_from_row(row: &rusqlite::Row) -> rusqlite::Result<Prompt> {
    Ok(Prompt {
        id: row.get(0)?,
        content_session_id: row.get(1)?,
        prompt_number: row.get(2)?,
        text: row.get(3)?,
        project: row.get(4)?,
        created_at: row.get(5)?,
        created_at_epoch: row.get(6)?,
    })
}

/// Store one user prompt. Returns the new id.
pub fn store_prompt_sync(
    conn: &Connection,
    content_session_id: &str,
    prompt_number: i64,
    text: &str,
    project: Option<&str>,
) -> Result<i64> {
    if content_session_id.is_empty() {
        return Err(MemoryError::InvalidInput("prompt requires a session id".into()));
    }
    let (created_at, created_at_epoch) = now_pair();
    conn.execute(
        "INSERT INTO prompts (content_session_id, prompt_number, text, project,
         created_at, created_at_epoch)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            content_session_id,
            prompt_number,
            text,
            project,
            created_at,
            created_at_epoch
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Dedup probe for import: (content_session_id, prompt_number).
pub fn prompt_exists_sync(
    conn: &Connection,
    content_session_id: &str,
    prompt_number: i64,
) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .prepare_cached(
            "SELECT id FROM prompts
             WHERE content_session_id = ? AND prompt_number = ?
             LIMIT 1",
        )?
        .query_row(params![content_session_id, prompt_number], |row| row.get(0))
        .optional()?;
    Ok(hit.is_some())
}

/// Most recent prompts for a project.
pub fn recent_prompts_sync(
    conn: &Connection,
    project: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Prompt>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PROMPT_COLUMNS} FROM prompts
         WHERE project = ?
         ORDER BY created_at_epoch DESC, id DESC
         LIMIT ?"
    ))?;
    let rows = stmt.query_map(params![project, limit as i64], prompt_from_row)?;
    rows.collect()
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Fields of a new checkpoint. The context snapshot is filled in by the
/// caller (serialized recent observations).
#[derive(Debug, Clone, Default)]
pub struct NewCheckpoint {
    pub session_id: String,
    pub project: String,
    pub task: String,
    pub progress: Option<String>,
    pub next_steps: Option<String>,
    pub open_questions: Option<String>,
    pub relevant_files: Option<String>,
    pub context_snapshot: Option<String>,
}

const CHECKPOINT_COLUMNS: &str = "id, session_id, project, task, progress, next_steps, \
     open_questions, relevant_files, context_snapshot, created_at, created_at_epoch";

fn checkpoint_from_row(row: &rusqlite::Row) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        id: row.get(0)?,
        session_id: row.get(1)?,
        project: row.get(2)?,
        task: row.get(3)?,
        progress: row.get(4)?,
        next_steps: row.get(5)?,
        open_questions: row.get(6)?,
        relevant_files: row.get(7)?,
        context_snapshot: row.get(8)?,
        created_at: row.get(9)?,
        created_at_epoch: row.get(10)?,
    })
}

/// Store a checkpoint. Returns the new id.
pub fn create_checkpoint_sync(conn: &Connection, checkpoint: NewCheckpoint) -> Result<i64> {
    if checkpoint.task.is_empty() {
        return Err(MemoryError::InvalidInput("checkpoint requires a task".into()));
    }
    let (created_at, created_at_epoch) = now_pair();
    conn.execute(
        "INSERT INTO checkpoints (session_id, project, task, progress, next_steps,
         open_questions, relevant_files, context_snapshot, created_at, created_at_epoch)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            checkpoint.session_id,
            checkpoint.project,
            checkpoint.task,
            checkpoint.progress,
            checkpoint.next_steps,
            checkpoint.open_questions,
            checkpoint.relevant_files,
            checkpoint.context_snapshot,
            created_at,
            created_at_epoch,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a checkpoint by id.
pub fn get_checkpoint_sync(conn: &Connection, id: i64) -> rusqlite::Result<Option<Checkpoint>> {
    conn.prepare_cached(&format!(
        "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE id = ?"
    ))?
    .query_row([id], checkpoint_from_row)
    .optional()
}

/// The most recent checkpoint for a project, if any.
pub fn latest_checkpoint_for_project_sync(
    conn: &Connection,
    project: &str,
) -> rusqlite::Result<Option<Checkpoint>> {
    conn.prepare_cached(&format!(
        "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints
         WHERE project = ?
         ORDER BY created_at_epoch DESC, id DESC
         LIMIT 1"
    ))?
    .query_row([project], checkpoint_from_row)
    .optional()
}

// ---------------------------------------------------------------------------
// Project aliases
// ---------------------------------------------------------------------------

/// Upsert a display alias for a project name.
pub fn set_project_alias_sync(
    conn: &Connection,
    project_name: &str,
    display_name: &str,
) -> Result<()> {
    if project_name.is_empty() {
        return Err(MemoryError::InvalidInput("project name must not be empty".into()));
    }
    let (created_at, created_at_epoch) = now_pair();
    conn.execute(
        "INSERT INTO project_aliases (project_name, display_name, created_at, created_at_epoch)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(project_name) DO UPDATE SET display_name = ?2",
        params![project_name, display_name, created_at, created_at_epoch],
    )?;
    Ok(())
}

/// Resolve the display alias for a project name, if set.
pub fn get_project_alias_sync(
    conn: &Connection,
    project_name: &str,
) -> rusqlite::Result<Option<ProjectAlias>> {
    conn.prepare_cached(
        "SELECT id, project_name, display_name FROM project_aliases WHERE project_name = ?",
    )?
    .query_row([project_name], |row| {
        Ok(ProjectAlias {
            id: row.get(0)?,
            project_name: row.get(1)?,
            display_name: row.get(2)?,
        })
    })
    .optional()
}

// ---------------------------------------------------------------------------
// GitHub links
// ---------------------------------------------------------------------------

/// Fields of a new GitHub cross-reference. Exactly one of observation_id /
/// session_id should be set; both-None is a validation failure.
#[derive(Debug, Clone, Default)]
pub struct NewGithubLink {
    pub observation_id: Option<i64>,
    pub session_id: Option<String>,
    pub repo: String,
    pub kind: String,
    pub number: Option<i64>,
    pub url: Option<String>,
}

/// Attach a GitHub link to an observation or session.
pub fn add_github_link_sync(conn: &Connection, link: NewGithubLink) -> Result<i64> {
    if link.repo.is_empty() {
        return Err(MemoryError::InvalidInput("github link requires a repo".into()));
    }
    if link.observation_id.is_none() && link.session_id.is_none() {
        return Err(MemoryError::InvalidInput(
            "github link requires an observation or session".into(),
        ));
    }
    let (created_at, created_at_epoch) = now_pair();
    conn.execute(
        "INSERT INTO github_links (observation_id, session_id, repo, kind, number, url,
         created_at, created_at_epoch)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            link.observation_id,
            link.session_id,
            link.repo,
            if link.kind.is_empty() { "issue" } else { &link.kind },
            link.number,
            link.url,
            created_at,
            created_at_epoch,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Links attached to an observation.
pub fn github_links_for_observation_sync(
    conn: &Connection,
    observation_id: i64,
) -> rusqlite::Result<Vec<GithubLink>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, observation_id, session_id, repo, kind, number, url, created_at
         FROM github_links WHERE observation_id = ? ORDER BY id",
    )?;
    let rows = stmt.query_map([observation_id], |row| {
        Ok(GithubLink {
            id: row.get(0)?,
            observation_id: row.get(1)?,
            session_id: row.get(2)?,
            repo: row.get(3)?,
            kind: row.get(4)?,
            number: row.get(5)?,
            url: row.get(6)?,
            created_at: row.get(7)?,
        })
    })?;
    rows.collect()
}
