// src/porter/mod.rs
// JSONL import/export for the three portable entity families

mod export;
mod import;

pub use export::{export_jsonl, ExportOptions, ExportStats};
pub use import::{import_jsonl, ImportOptions, ImportReport};

use serde::{Deserialize, Serialize};

/// JSONL schema version written to and accepted from the `_meta` line.
pub const SCHEMA_VERSION: &str = "2.5.0";

/// Record type tags.
pub const TYPE_OBSERVATION: &str = "observation";
pub const TYPE_SUMMARY: &str = "summary";
pub const TYPE_PROMPT: &str = "prompt";

/// Per-family record counts in the `_meta` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportCounts {
    pub observations: i64,
    pub summaries: i64,
    pub prompts: i64,
}

/// The optional first line of an export:
/// `{"_meta": {version, exported_at, counts, filters?}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMeta {
    pub version: String,
    pub exported_at: String,
    pub counts: ExportCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<ExportFilters>,
}

/// Filters recorded in the meta line when the export was restricted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::observations::{store_observation_sync, NewObservation};
    use crate::db::pool::DatabasePool;
    use crate::db::sessions::{store_summary_sync, NewSummary};
    use std::sync::Arc;

    async fn seeded_pool() -> Arc<DatabasePool> {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        for i in 0..4 {
            pool.run(move |conn| {
                store_observation_sync(
                    conn,
                    NewObservation {
                        session_id: "s1".to_string(),
                        project: "p1".to_string(),
                        obs_type: "command".to_string(),
                        title: format!("command {i}"),
                        text: Some(format!("output of command {i}")),
                        ..Default::default()
                    },
                )
            })
            .await
            .unwrap();
        }
        pool.run(|conn| {
            store_summary_sync(
                conn,
                NewSummary {
                    session_id: "s1".to_string(),
                    project: "p1".to_string(),
                    learned: Some("the retry path was never exercised".to_string()),
                    ..Default::default()
                },
            )
        })
        .await
        .unwrap();
        pool
    }

    async fn export_lines(pool: &Arc<DatabasePool>) -> Vec<String> {
        let mut lines = Vec::new();
        export_jsonl(pool, &ExportOptions::default(), |line| {
            lines.push(line.to_string());
            Ok(())
        })
        .await
        .unwrap();
        lines
    }

    #[tokio::test]
    async fn test_export_meta_counts() {
        let pool = seeded_pool().await;
        let lines = export_lines(&pool).await;

        // meta + 4 observations + 1 summary
        assert_eq!(lines.len(), 6);

        let meta: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(meta["_meta"]["version"], SCHEMA_VERSION);
        assert_eq!(meta["_meta"]["counts"]["observations"], 4);
        assert_eq!(meta["_meta"]["counts"]["summaries"], 1);
        assert_eq!(meta["_meta"]["counts"]["prompts"], 0);
    }

    #[tokio::test]
    async fn test_export_orders_families_ascending() {
        let pool = seeded_pool().await;
        let lines = export_lines(&pool).await;

        let mut last_epoch = i64::MIN;
        for line in &lines[1..5] {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["_type"], "observation");
            let epoch = v["created_at_epoch"].as_i64().unwrap();
            assert!(epoch >= last_epoch);
            last_epoch = epoch;
        }
        let last: serde_json::Value = serde_json::from_str(&lines[5]).unwrap();
        assert_eq!(last["_type"], "summary");
    }

    #[tokio::test]
    async fn test_roundtrip_into_empty_db() {
        let source = seeded_pool().await;
        let lines = export_lines(&source).await;

        let target = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let report = import_jsonl(&target, lines.clone(), ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(report.imported, 5);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.errors, 0);
        assert_eq!(report.total, 5);

        // Counts reproduce exactly
        let (obs, sums): (i64, i64) = target
            .run(|conn| {
                let obs = conn.query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0))?;
                let sums = conn.query_row("SELECT COUNT(*) FROM summaries", [], |r| r.get(0))?;
                Ok::<_, rusqlite::Error>((obs, sums))
            })
            .await
            .unwrap();
        assert_eq!((obs, sums), (4, 1));

        // Second import of the same file: everything skips
        let second = import_jsonl(&target, lines, ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, second.total);
        assert_eq!(second.errors, 0);
    }

    #[tokio::test]
    async fn test_import_tolerates_missing_meta_comments_and_blanks() {
        let target = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let lines = vec![
            "# export from another machine".to_string(),
            String::new(),
            r#"{"_type":"prompt","content_session_id":"s1","prompt_number":1,"text":"hello"}"#
                .to_string(),
        ];
        let report = import_jsonl(&target, lines, ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(report.total, 1);
    }

    #[tokio::test]
    async fn test_import_counts_bad_lines_as_errors() {
        let target = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let lines = vec![
            "{not json at all".to_string(),
            r#"{"_type":"teapot","project":"p1"}"#.to_string(),
            r#"{"_type":"observation","project":"p1"}"#.to_string(),
            r#"{"_type":"observation","project":"p1","type":"command","title":"good one"}"#
                .to_string(),
        ];
        let report = import_jsonl(&target, lines, ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.errors, 3);
        assert_eq!(report.total, 4);
        assert_eq!(report.error_details.len(), 3);
        assert!(report.error_details[0].contains("line 1"));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let source = seeded_pool().await;
        let lines = export_lines(&source).await;

        let target = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let report = import_jsonl(
            &target,
            lines,
            ImportOptions { dry_run: true },
        )
        .await
        .unwrap();
        assert_eq!(report.imported, 5);
        assert_eq!(report.skipped, 0);

        let count: i64 = target
            .run(|conn| {
                conn.query_row("SELECT COUNT(*) FROM observations", [], |r| {
                    r.get::<_, i64>(0)
                })
            })
            .await
            .unwrap();
        assert_eq!(count, 0, "dry run must not write");
    }

    #[tokio::test]
    async fn test_duplicate_within_file_skipped() {
        let target = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let record =
            r#"{"_type":"observation","project":"p1","type":"command","title":"same"}"#.to_string();
        let report = import_jsonl(
            &target,
            vec![record.clone(), record],
            ImportOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 1);
    }
}
