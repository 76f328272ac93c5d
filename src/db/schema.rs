// src/db/schema.rs
// Database schema and migrations
//
// Migrations are an append-only numbered list. `schema_versions` records
// every applied version; on open, all versions strictly greater than the
// highest applied one run in ascending order, one transaction per migration.
// Migrations are never edited in place.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Append-only migration list. Never edit an entry after it has shipped;
/// add a new version instead.
const MIGRATIONS: &[(i64, &str)] = &[
    (1, MIGRATION_V1_CORE),
    (2, MIGRATION_V2_CHECKPOINTS_ALIASES),
    (3, MIGRATION_V3_GITHUB_LINKS),
];

/// Current schema version (highest entry in MIGRATIONS).
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0)
}

/// Read the highest applied schema version (0 when the table is empty).
pub fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_versions",
        [],
        |row| row.get(0),
    )
}

/// Run all pending migrations.
///
/// Called during pool creation. A migration failure aborts the open: the
/// per-migration transaction leaves the schema at its previous version.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
    .context("failed to create schema_versions")?;

    let current = current_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("schema migration v{} failed", version))?;
        tx.execute(
            "INSERT INTO schema_versions (version, applied_at) VALUES (?, ?)",
            rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        tracing::info!("Applied schema migration v{}", version);
    }

    Ok(())
}

/// v1 - core entity families, FTS5 mirror with co-transactional triggers,
/// and the keyset-pagination indexes.
const MIGRATION_V1_CORE: &str = r#"
-- =======================================
-- OBSERVATIONS: atomic hook events
-- =======================================
CREATE TABLE observations (
    id INTEGER PRIMARY KEY,
    session_id TEXT NOT NULL,
    project TEXT NOT NULL,
    type TEXT NOT NULL,
    title TEXT NOT NULL,
    subtitle TEXT,
    text TEXT,
    narrative TEXT,
    facts TEXT,
    concepts TEXT,
    files_read TEXT,
    files_modified TEXT,
    prompt_number INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT NOT NULL,
    discovery_tokens INTEGER NOT NULL DEFAULT 0,
    auto_category TEXT NOT NULL DEFAULT 'general',
    last_accessed_epoch INTEGER,
    stale INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    created_at_epoch INTEGER NOT NULL
);
CREATE INDEX idx_observations_keyset
    ON observations(project, created_at_epoch DESC, id DESC);
CREATE INDEX idx_observations_hash
    ON observations(content_hash, created_at_epoch);
CREATE INDEX idx_observations_type ON observations(project, type);

-- FTS5 mirror of {title, text, narrative, concepts}. External content:
-- the triggers below keep it co-transactional with the base row.
CREATE VIRTUAL TABLE observations_fts USING fts5(
    title,
    text,
    narrative,
    concepts,
    content='observations',
    content_rowid='id',
    tokenize='porter unicode61 remove_diacritics 1'
);

CREATE TRIGGER observations_fts_ai AFTER INSERT ON observations BEGIN
    INSERT INTO observations_fts(rowid, title, text, narrative, concepts)
    VALUES (new.id, new.title, new.text, new.narrative, new.concepts);
END;
CREATE TRIGGER observations_fts_ad AFTER DELETE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, text, narrative, concepts)
    VALUES ('delete', old.id, old.title, old.text, old.narrative, old.concepts);
END;
CREATE TRIGGER observations_fts_au AFTER UPDATE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, text, narrative, concepts)
    VALUES ('delete', old.id, old.title, old.text, old.narrative, old.concepts);
    INSERT INTO observations_fts(rowid, title, text, narrative, concepts)
    VALUES (new.id, new.title, new.text, new.narrative, new.concepts);
END;

-- =======================================
-- EMBEDDINGS: strictly subordinate to observations
-- =======================================
CREATE TABLE observation_embeddings (
    observation_id INTEGER PRIMARY KEY
        REFERENCES observations(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    model TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    created_at_epoch INTEGER NOT NULL,
    CHECK (length(embedding) = dimensions * 4)
);

-- =======================================
-- SESSIONS: lifecycle records
-- =======================================
CREATE TABLE sessions (
    id INTEGER PRIMARY KEY,
    content_session_id TEXT UNIQUE NOT NULL,
    project TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    started_at TEXT NOT NULL,
    started_at_epoch INTEGER NOT NULL,
    completed_at TEXT,
    completed_at_epoch INTEGER
);
CREATE INDEX idx_sessions_project ON sessions(project, started_at_epoch DESC);

-- =======================================
-- SUMMARIES: end-of-session digests
-- =======================================
CREATE TABLE summaries (
    id INTEGER PRIMARY KEY,
    session_id TEXT NOT NULL,
    project TEXT NOT NULL,
    request TEXT,
    investigated TEXT,
    learned TEXT,
    completed TEXT,
    next_steps TEXT,
    notes TEXT,
    created_at TEXT NOT NULL,
    created_at_epoch INTEGER NOT NULL
);
CREATE INDEX idx_summaries_keyset
    ON summaries(project, created_at_epoch DESC, id DESC);
CREATE INDEX idx_summaries_dedup
    ON summaries(session_id, project, created_at_epoch);

-- =======================================
-- PROMPTS: user-issued prompts per session
-- =======================================
CREATE TABLE prompts (
    id INTEGER PRIMARY KEY,
    content_session_id TEXT NOT NULL,
    prompt_number INTEGER NOT NULL,
    text TEXT NOT NULL,
    project TEXT,
    created_at TEXT NOT NULL,
    created_at_epoch INTEGER NOT NULL
);
CREATE INDEX idx_prompts_keyset
    ON prompts(project, created_at_epoch DESC, id DESC);
CREATE INDEX idx_prompts_session ON prompts(content_session_id, prompt_number);
"#;

/// v2 - checkpoints and project display aliases.
const MIGRATION_V2_CHECKPOINTS_ALIASES: &str = r#"
CREATE TABLE checkpoints (
    id INTEGER PRIMARY KEY,
    session_id TEXT NOT NULL,
    project TEXT NOT NULL,
    task TEXT NOT NULL,
    progress TEXT,
    next_steps TEXT,
    open_questions TEXT,
    relevant_files TEXT,
    context_snapshot TEXT,
    created_at TEXT NOT NULL,
    created_at_epoch INTEGER NOT NULL
);
CREATE INDEX idx_checkpoints_session ON checkpoints(session_id, created_at_epoch DESC);
CREATE INDEX idx_checkpoints_project ON checkpoints(project, created_at_epoch DESC);

CREATE TABLE project_aliases (
    id INTEGER PRIMARY KEY,
    project_name TEXT NOT NULL,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    created_at_epoch INTEGER NOT NULL
);
CREATE UNIQUE INDEX idx_project_aliases_name ON project_aliases(project_name);
"#;

/// v3 - optional cross-references to GitHub repos/issues/PRs.
const MIGRATION_V3_GITHUB_LINKS: &str = r#"
CREATE TABLE github_links (
    id INTEGER PRIMARY KEY,
    observation_id INTEGER REFERENCES observations(id) ON DELETE CASCADE,
    session_id TEXT,
    repo TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'issue',
    number INTEGER,
    url TEXT,
    created_at TEXT NOT NULL,
    created_at_epoch INTEGER NOT NULL
);
CREATE INDEX idx_github_links_observation ON github_links(observation_id);
CREATE INDEX idx_github_links_session ON github_links(session_id);
"#;
