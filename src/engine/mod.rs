// src/engine/mod.rs
// The engine handle: owns the pool, the embedding pipeline and every
// component, and exposes the programmatic API consumed by the HTTP/MCP/CLI
// layers
//
// Process-wide state is confined to this struct: it is created at startup,
// shared behind an Arc by the worker, and torn down with `shutdown()`.

mod report;

pub use report::{Report, ReportOptions, ReportPeriod};

use crate::background::{shutdown_worker, spawn_embed_worker, EmbedQueue};
use crate::backup::{self, BackupEntry, BackupMeta};
use crate::config::{DataDirs, RetentionPolicy, Settings};
use crate::context::{Contexter, SmartContext, SmartContextOptions};
use crate::db::embeddings::EmbeddingStats;
use crate::db::observations::{
    store_observation_sync, timeline_sync, ConsolidateOptions, ConsolidateResult, NewObservation,
};
use crate::db::pool::DatabasePool;
use crate::db::retention::RetentionReport;
use crate::db::search::{search_lexical_with_rank_sync, LexicalHit, SearchFilters};
use crate::db::sessions::{
    add_github_link_sync, create_checkpoint_sync, get_checkpoint_sync, get_or_create_session_sync,
    get_project_alias_sync, github_links_for_observation_sync, latest_checkpoint_for_project_sync,
    recent_prompts_sync, recent_sessions_sync, recent_summaries_sync, set_project_alias_sync,
    store_prompt_sync, store_summary_sync, complete_session_sync, NewCheckpoint, NewGithubLink,
    NewSummary,
};
use crate::db::types::{
    is_knowledge_type, Checkpoint, GithubLink, KnowledgeMeta, Observation, Prompt, Session,
    Summary, KNOWLEDGE_TYPES,
};
use crate::embeddings::EmbeddingClient;
use crate::error::{MemoryError, Result};
use crate::maintain::{DecayStats, Maintainer};
use crate::porter::{self, ExportOptions, ExportStats, ImportOptions, ImportReport};
use crate::search::{
    HybridSearchOptions, HybridSearcher, SearchHit, SearchSource, VectorIndex,
    VectorSearchOptions,
};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

/// Rows included in `get_context` per family.
const CONTEXT_OBSERVATIONS: usize = 10;
const CONTEXT_SUMMARIES: usize = 5;
const CONTEXT_PROMPTS: usize = 10;

/// Observations captured into a checkpoint's context snapshot.
const SNAPSHOT_OBSERVATIONS: usize = 10;

/// Compact observation form serialized into checkpoint snapshots.
#[derive(Debug, Clone, Serialize)]
struct SnapshotEntry<'a> {
    id: i64,
    #[serde(rename = "type")]
    obs_type: &'a str,
    title: &'a str,
    created_at: &'a str,
}

/// Project context bundle for session start.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project: String,
    pub recent_observations: Vec<Observation>,
    pub recent_summaries: Vec<Summary>,
    pub recent_prompts: Vec<Prompt>,
}

/// Parameters for storing a knowledge record.
#[derive(Debug, Clone, Default)]
pub struct NewKnowledge {
    pub session_id: String,
    pub project: String,
    pub knowledge_type: String,
    pub title: String,
    pub text: Option<String>,
    pub narrative: Option<String>,
    pub concepts: Option<String>,
    pub importance: Option<u8>,
}

/// The engine handle.
pub struct Engine {
    dirs: Option<DataDirs>,
    settings: Settings,
    pool: Arc<DatabasePool>,
    embedder: Option<Arc<EmbeddingClient>>,
    vector: Arc<VectorIndex>,
    searcher: Arc<HybridSearcher>,
    contexter: Contexter,
    maintainer: Maintainer,
    embed_queue: EmbedQueue,
    embed_shutdown: Arc<AtomicBool>,
    embed_worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    /// Open the engine at the default (env-resolved) data directory.
    pub async fn open() -> Result<Self> {
        let dirs = DataDirs::from_env()?;
        Self::open_at(dirs).await
    }

    /// Open the engine at an explicit data directory.
    pub async fn open_at(dirs: DataDirs) -> Result<Self> {
        dirs.ensure_layout()?;
        let settings = dirs.load_settings();
        let pool = Arc::new(DatabasePool::open(&dirs.db_path()).await?);
        let embedder = EmbeddingClient::from_env().map(Arc::new);
        Ok(Self::assemble(Some(dirs), settings, pool, embedder))
    }

    /// Open an in-memory engine (tests, ephemeral embedding). No data
    /// directory: backups are unavailable.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = Arc::new(DatabasePool::open_in_memory().await?);
        Ok(Self::assemble(None, Settings::default(), pool, None))
    }

    fn assemble(
        dirs: Option<DataDirs>,
        settings: Settings,
        pool: Arc<DatabasePool>,
        embedder: Option<Arc<EmbeddingClient>>,
    ) -> Self {
        let vector = Arc::new(VectorIndex::new(pool.clone(), embedder.clone()));
        let searcher = Arc::new(HybridSearcher::new(
            pool.clone(),
            vector.clone(),
            embedder.clone(),
        ));
        let contexter = Contexter::new(pool.clone(), searcher.clone());
        let maintainer = Maintainer::new(pool.clone());

        let embed_queue = EmbedQueue::new();
        let embed_shutdown = Arc::new(AtomicBool::new(false));
        let embed_worker = embedder.as_ref().map(|embedder| {
            spawn_embed_worker(
                embed_queue.clone(),
                pool.clone(),
                vector.clone(),
                embedder.clone(),
                embed_shutdown.clone(),
            )
        });

        Self {
            dirs,
            settings,
            pool,
            embedder,
            vector,
            searcher,
            contexter,
            maintainer,
            embed_queue,
            embed_shutdown,
            embed_worker: Mutex::new(embed_worker),
        }
    }

    /// The underlying pool, for callers that need raw access (tests, CLI).
    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    /// Loaded settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stop the background embedding worker and wait for it.
    pub async fn shutdown(&self) {
        shutdown_worker(&self.embed_queue, &self.embed_shutdown);
        let handle = {
            #[allow(clippy::expect_used)]
            let mut guard = self.embed_worker.lock().expect("worker handle lock poisoned");
            guard.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::debug!("Embedding worker join failed: {}", e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    /// Recent activity bundle for session start.
    pub async fn get_context(&self, project: &str) -> Result<ProjectContext> {
        let project_owned = project.to_string();
        let (observations, summaries, prompts) = self
            .pool
            .run(move |conn| {
                let observations = crate::db::observations::recent_observations_sync(
                    conn,
                    &project_owned,
                    CONTEXT_OBSERVATIONS,
                )?;
                let summaries = recent_summaries_sync(conn, &project_owned, CONTEXT_SUMMARIES)?;
                let prompts = recent_prompts_sync(conn, &project_owned, CONTEXT_PROMPTS)?;
                Ok::<_, rusqlite::Error>((observations, summaries, prompts))
            })
            .await?;

        Ok(ProjectContext {
            project: project.to_string(),
            recent_observations: observations,
            recent_summaries: summaries,
            recent_prompts: prompts,
        })
    }

    /// Smart-context assembly under a token budget.
    pub async fn get_smart_context(&self, opts: &SmartContextOptions) -> Result<SmartContext> {
        self.contexter.get_smart_context(opts).await
    }

    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    /// Store one observation. Returns −1 when an identical observation
    /// landed within the per-type dedup window. On success the observation
    /// is queued for asynchronous embedding.
    pub async fn store_observation(&self, obs: NewObservation) -> Result<i64> {
        let id = self
            .pool
            .run_with_retry(move |conn| store_observation_sync(conn, obs.clone()))
            .await?;
        if id > 0 && self.embedder.is_some() {
            self.embed_queue.enqueue(id);
        }
        Ok(id)
    }

    /// Store a knowledge record: a constrained observation type carrying
    /// typed metadata in `facts`.
    pub async fn store_knowledge(&self, knowledge: NewKnowledge) -> Result<i64> {
        if !is_knowledge_type(&knowledge.knowledge_type) {
            return Err(MemoryError::InvalidInput(format!(
                "knowledge type must be one of {:?}, got {:?}",
                KNOWLEDGE_TYPES, knowledge.knowledge_type
            )));
        }
        if let Some(importance) = knowledge.importance {
            if !(1..=5).contains(&importance) {
                return Err(MemoryError::InvalidInput(
                    "importance must be between 1 and 5".into(),
                ));
            }
        }

        let meta = KnowledgeMeta::new(&knowledge.knowledge_type, knowledge.importance)
            .ok_or_else(|| MemoryError::InvalidInput("unknown knowledge type".into()))?;
        let facts = serde_json::to_string(&meta)?;

        self.store_observation(NewObservation {
            session_id: knowledge.session_id,
            project: knowledge.project,
            obs_type: knowledge.knowledge_type,
            title: knowledge.title,
            text: knowledge.text,
            narrative: knowledge.narrative,
            concepts: knowledge.concepts,
            facts: Some(facts),
            ..Default::default()
        })
        .await
    }

    /// Store an end-of-session summary.
    pub async fn store_summary(&self, summary: NewSummary) -> Result<i64> {
        self.pool
            .run_with_retry(move |conn| store_summary_sync(conn, summary.clone()))
            .await
    }

    /// Store one user prompt.
    pub async fn store_prompt(
        &self,
        session_id: &str,
        prompt_number: i64,
        text: &str,
        project: Option<&str>,
    ) -> Result<i64> {
        let session_id = session_id.to_string();
        let text = text.to_string();
        let project = project.map(str::to_string);
        self.pool
            .run_with_retry(move |conn| {
                store_prompt_sync(conn, &session_id, prompt_number, &text, project.as_deref())
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub async fn get_or_create_session(
        &self,
        external_session_id: &str,
        project: &str,
    ) -> Result<Session> {
        let external = external_session_id.to_string();
        let project = project.to_string();
        self.pool
            .run_with_retry(move |conn| get_or_create_session_sync(conn, &external, &project))
            .await
    }

    pub async fn complete_session(&self, id: i64) -> Result<()> {
        self.pool
            .run(move |conn| complete_session_sync(conn, id, "completed"))
            .await
    }

    pub async fn fail_session(&self, id: i64) -> Result<()> {
        self.pool
            .run(move |conn| complete_session_sync(conn, id, "failed"))
            .await
    }

    pub async fn recent_sessions(&self, project: &str, limit: usize) -> Result<Vec<Session>> {
        let project = project.to_string();
        self.pool
            .run(move |conn| recent_sessions_sync(conn, &project, limit))
            .await
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Hybrid search with defaults (limit 10, no project restriction).
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.searcher
            .search(
                query,
                &HybridSearchOptions {
                    project: None,
                    limit: 10,
                },
            )
            .await
    }

    /// Lexical search with explicit filters.
    pub async fn search_advanced(
        &self,
        query: &str,
        filters: SearchFilters,
    ) -> Result<Vec<LexicalHit>> {
        let query = query.to_string();
        self.pool
            .run(move |conn| search_lexical_with_rank_sync(conn, &query, &filters))
            .await
    }

    /// Hybrid search with explicit options.
    pub async fn hybrid_search(
        &self,
        query: &str,
        opts: &HybridSearchOptions,
    ) -> Result<Vec<SearchHit>> {
        self.searcher.search(query, opts).await
    }

    /// Vector-only search. Degrades to an empty result when no embedding
    /// provider is configured or the query embedding fails.
    pub async fn semantic_search(
        &self,
        query: &str,
        opts: &VectorSearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let Some(embedder) = self.embedder.as_ref() else {
            tracing::debug!("Semantic search without embedding provider, returning empty");
            return Ok(Vec::new());
        };
        let query_vector = match embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Query embedding failed for semantic search: {}", e);
                return Ok(Vec::new());
            }
        };

        let hits = self.vector.search(&query_vector, opts).await?;
        let ids: Vec<i64> = hits.iter().map(|h| h.observation_id).collect();
        let rows = self
            .pool
            .run(move |conn| crate::db::observations::observations_by_ids_sync(conn, &ids))
            .await?;
        let by_id: std::collections::HashMap<i64, Observation> =
            rows.into_iter().map(|o| (o.id, o)).collect();

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                by_id.get(&hit.observation_id).cloned().map(|observation| SearchHit {
                    observation,
                    score: hit.similarity as f64,
                    semantic: hit.similarity as f64,
                    fts_rank: None,
                    source: SearchSource::Vector,
                })
            })
            .collect())
    }

    /// One keyset page of a project's observations, newest first.
    pub async fn list_observations(
        &self,
        project: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<crate::db::observations::ObservationPage> {
        let project = project.to_string();
        let cursor = cursor.map(str::to_string);
        self.pool
            .run(move |conn| {
                crate::db::observations::observations_page_sync(
                    conn,
                    &project,
                    cursor.as_deref(),
                    limit,
                )
            })
            .await
    }

    /// Explicitly delete an observation (embedding and FTS row go with it).
    pub async fn delete_observation(&self, id: i64) -> Result<bool> {
        let deleted = self
            .pool
            .run(move |conn| crate::db::observations::delete_observation_sync(conn, id))
            .await?;
        Ok(deleted > 0)
    }

    /// Observations around an anchor, ordered.
    pub async fn timeline(
        &self,
        anchor_id: i64,
        before: usize,
        after: usize,
    ) -> Result<Vec<Observation>> {
        self.pool
            .run(move |conn| timeline_sync(conn, anchor_id, before, after))
            .await
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    pub async fn detect_stale_observations(&self, project: &str) -> Result<usize> {
        self.maintainer.detect_stale(project).await
    }

    pub async fn consolidate_observations(
        &self,
        project: &str,
        opts: ConsolidateOptions,
    ) -> Result<ConsolidateResult> {
        self.maintainer.consolidate(project, opts).await
    }

    pub async fn get_decay_stats(&self, project: &str) -> Result<DecayStats> {
        self.maintainer.decay_stats(project).await
    }

    /// Run a retention sweep; None uses the settings-file policy.
    pub async fn apply_retention(&self, policy: Option<RetentionPolicy>) -> Result<RetentionReport> {
        let policy = policy.unwrap_or(self.settings.retention);
        self.maintainer.apply_retention(policy).await
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Store a checkpoint, capturing a snapshot of the project's 10 most
    /// recent observations.
    pub async fn create_checkpoint(&self, mut checkpoint: NewCheckpoint) -> Result<i64> {
        if checkpoint.context_snapshot.is_none() {
            let project = checkpoint.project.clone();
            let recent = self
                .pool
                .run(move |conn| {
                    crate::db::observations::recent_observations_sync(
                        conn,
                        &project,
                        SNAPSHOT_OBSERVATIONS,
                    )
                })
                .await?;
            let entries: Vec<SnapshotEntry> = recent
                .iter()
                .map(|o| SnapshotEntry {
                    id: o.id,
                    obs_type: &o.obs_type,
                    title: &o.title,
                    created_at: &o.created_at,
                })
                .collect();
            checkpoint.context_snapshot = Some(serde_json::to_string(&entries)?);
        }

        self.pool
            .run_with_retry(move |conn| create_checkpoint_sync(conn, checkpoint.clone()))
            .await
    }

    pub async fn get_checkpoint(&self, id: i64) -> Result<Option<Checkpoint>> {
        self.pool
            .run(move |conn| get_checkpoint_sync(conn, id))
            .await
    }

    pub async fn get_latest_project_checkpoint(&self, project: &str) -> Result<Option<Checkpoint>> {
        let project = project.to_string();
        self.pool
            .run(move |conn| latest_checkpoint_for_project_sync(conn, &project))
            .await
    }

    // -----------------------------------------------------------------------
    // Embeddings
    // -----------------------------------------------------------------------

    /// Embed observations that are missing vectors. Returns the count
    /// embedded (0 without a provider).
    pub async fn backfill_embeddings(&self, batch_size: usize) -> Result<usize> {
        self.vector.backfill(batch_size).await
    }

    pub async fn get_embedding_stats(&self) -> Result<EmbeddingStats> {
        self.vector.stats().await
    }

    // -----------------------------------------------------------------------
    // Porter
    // -----------------------------------------------------------------------

    pub async fn export_jsonl<W>(&self, opts: &ExportOptions, writer: W) -> Result<ExportStats>
    where
        W: FnMut(&str) -> std::io::Result<()>,
    {
        porter::export_jsonl(&self.pool, opts, writer).await
    }

    pub async fn import_jsonl<I>(&self, lines: I, opts: ImportOptions) -> Result<ImportReport>
    where
        I: IntoIterator<Item = String>,
    {
        porter::import_jsonl(&self.pool, lines, opts).await
    }

    // -----------------------------------------------------------------------
    // Backup
    // -----------------------------------------------------------------------

    fn dirs(&self) -> Result<&DataDirs> {
        self.dirs
            .as_ref()
            .ok_or_else(|| MemoryError::InvalidInput("in-memory engine has no data directory".into()))
    }

    pub async fn backup_create(&self) -> Result<BackupMeta> {
        let dirs = self.dirs()?;
        backup::create(&dirs.db_path(), &dirs.backups_dir())
    }

    pub async fn backup_list(&self) -> Result<Vec<BackupEntry>> {
        let dirs = self.dirs()?;
        backup::list(&dirs.backups_dir())
    }

    pub async fn backup_restore(&self, backup_file: &std::path::Path) -> Result<()> {
        let dirs = self.dirs()?;
        backup::restore(backup_file, &dirs.db_path())
    }

    /// Rotate backups; None uses the settings-file keep count.
    pub async fn backup_rotate(&self, max_keep: Option<i64>) -> Result<usize> {
        let dirs = self.dirs()?;
        let max_keep = max_keep.unwrap_or(self.settings.backup_max_keep as i64);
        backup::rotate(&dirs.backups_dir(), max_keep)
    }

    // -----------------------------------------------------------------------
    // Aliases & links
    // -----------------------------------------------------------------------

    pub async fn set_project_alias(&self, project: &str, display_name: &str) -> Result<()> {
        let project = project.to_string();
        let display_name = display_name.to_string();
        self.pool
            .run(move |conn| set_project_alias_sync(conn, &project, &display_name))
            .await
    }

    /// The display name for a project, falling back to the raw name.
    pub async fn resolve_project_alias(&self, project: &str) -> Result<String> {
        let project_owned = project.to_string();
        let alias = self
            .pool
            .run(move |conn| get_project_alias_sync(conn, &project_owned))
            .await?;
        Ok(alias
            .map(|a| a.display_name)
            .unwrap_or_else(|| project.to_string()))
    }

    pub async fn link_github(&self, link: NewGithubLink) -> Result<i64> {
        self.pool
            .run(move |conn| add_github_link_sync(conn, link))
            .await
    }

    pub async fn get_github_links(&self, observation_id: i64) -> Result<Vec<GithubLink>> {
        self.pool
            .run(move |conn| github_links_for_observation_sync(conn, observation_id))
            .await
    }

    // -----------------------------------------------------------------------
    // Reports
    // -----------------------------------------------------------------------

    pub async fn generate_report(&self, opts: &ReportOptions) -> Result<Report> {
        report::generate_report(&self.pool, opts).await
    }
}
