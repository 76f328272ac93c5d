// src/db/search.rs
// Lexical search over observations: FTS5 MATCH ranked by BM25, with a LIKE
// fallback when FTS rejects the query

use crate::db::observations::{observation_from_row, OBS_COLUMNS};
use crate::db::types::Observation;
use rusqlite::types::Value;
use rusqlite::Connection;

/// Hard ceiling on terms fed to FTS5 from one query.
const MAX_QUERY_TERMS: usize = 100;

/// Filters shared by the lexical search entry points.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub project: Option<String>,
    pub obs_type: Option<String>,
    pub epoch_from: Option<i64>,
    pub epoch_to: Option<i64>,
    pub limit: usize,
}

/// One lexical hit; `rank` is the raw BM25 value (lower is better) when the
/// FTS path produced it, None when the LIKE fallback did.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub observation: Observation,
    pub rank: Option<f64>,
}

/// Sanitize a user query for FTS5: normalize typographic quotes, split on
/// whitespace into at most 100 terms, and wrap each term in double quotes so
/// FTS operators in user input are treated as literals.
pub fn sanitize_fts_query(query: &str) -> String {
    let normalized: String = query
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            c => c,
        })
        .collect();

    normalized
        .split_whitespace()
        .take(MAX_QUERY_TERMS)
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape LIKE wildcards with `\` so user input matches literally.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Lexical search returning observations only.
pub fn search_lexical_sync(
    conn: &Connection,
    query: &str,
    filters: &SearchFilters,
) -> rusqlite::Result<Vec<Observation>> {
    Ok(search_lexical_with_rank_sync(conn, query, filters)?
        .into_iter()
        .map(|hit| hit.observation)
        .collect())
}

/// Lexical search keeping the raw BM25 rank for later normalization.
///
/// FTS5 MATCH first; any FTS error (not an empty result) falls back to LIKE
/// across {title, text, narrative, concepts} in insertion-order descending.
pub fn search_lexical_with_rank_sync(
    conn: &Connection,
    query: &str,
    filters: &SearchFilters,
) -> rusqlite::Result<Vec<LexicalHit>> {
    let fts_query = sanitize_fts_query(query);
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    match fts_search(conn, &fts_query, filters) {
        Ok(hits) => Ok(hits),
        Err(e) => {
            tracing::debug!("FTS query failed ({}), falling back to LIKE", e);
            like_search(conn, query, filters)
        }
    }
}

/// FTS5 MATCH ranked by bm25 with the column weights
/// {title: 10, text: 1, narrative: 5, concepts: 3}. Lower rank is better.
fn fts_search(
    conn: &Connection,
    fts_query: &str,
    filters: &SearchFilters,
) -> rusqlite::Result<Vec<LexicalHit>> {
    let mut sql = format!(
        "SELECT {cols}, bm25(observations_fts, 10.0, 1.0, 5.0, 3.0) AS rank
         FROM observations_fts
         JOIN observations o ON o.id = observations_fts.rowid
         WHERE observations_fts MATCH ?",
        cols = qualified_columns("o")
    );
    let mut values: Vec<Value> = vec![Value::from(fts_query.to_string())];
    push_filters(&mut sql, &mut values, filters, "o");
    sql.push_str(" ORDER BY rank ASC LIMIT ?");
    values.push(Value::from(filters.limit.max(1) as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
        let observation = observation_from_row(row)?;
        let rank: f64 = row.get(20)?;
        Ok(LexicalHit {
            observation,
            rank: Some(rank),
        })
    })?;
    rows.collect()
}

/// LIKE fallback: any term in any of the four text columns, newest rows
/// first. Produces no rank.
fn like_search(
    conn: &Connection,
    query: &str,
    filters: &SearchFilters,
) -> rusqlite::Result<Vec<LexicalHit>> {
    let terms: Vec<String> = query
        .split_whitespace()
        .take(MAX_QUERY_TERMS)
        .map(|t| format!("%{}%", escape_like(&t.to_lowercase())))
        .collect();
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let mut sql = format!("SELECT {OBS_COLUMNS} FROM observations WHERE (");
    let mut values: Vec<Value> = Vec::new();
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            sql.push_str(" OR ");
        }
        sql.push_str(
            "lower(title) LIKE ? ESCAPE '\\' \
             OR lower(COALESCE(text, '')) LIKE ? ESCAPE '\\' \
             OR lower(COALESCE(narrative, '')) LIKE ? ESCAPE '\\' \
             OR lower(COALESCE(concepts, '')) LIKE ? ESCAPE '\\'",
        );
        for _ in 0..4 {
            values.push(Value::from(term.clone()));
        }
    }
    sql.push(')');
    push_filters(&mut sql, &mut values, filters, "observations");
    sql.push_str(" ORDER BY id DESC LIMIT ?");
    values.push(Value::from(filters.limit.max(1) as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
        Ok(LexicalHit {
            observation: observation_from_row(row)?,
            rank: None,
        })
    })?;
    rows.collect()
}

/// Qualify OBS_COLUMNS with a table alias for joined queries.
fn qualified_columns(alias: &str) -> String {
    OBS_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Append the shared filter clauses and their params.
fn push_filters(sql: &mut String, values: &mut Vec<Value>, filters: &SearchFilters, alias: &str) {
    if let Some(project) = &filters.project {
        sql.push_str(&format!(" AND {alias}.project = ?"));
        values.push(Value::from(project.clone()));
    }
    if let Some(obs_type) = &filters.obs_type {
        sql.push_str(&format!(" AND {alias}.type = ?"));
        values.push(Value::from(obs_type.clone()));
    }
    if let Some(from) = filters.epoch_from {
        sql.push_str(&format!(" AND {alias}.created_at_epoch >= ?"));
        values.push(Value::from(from));
    }
    if let Some(to) = filters.epoch_to {
        sql.push_str(&format!(" AND {alias}.created_at_epoch <= ?"));
        values.push(Value::from(to));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::observations::{store_observation_sync, NewObservation};
    use crate::db::test_support::setup_test_connection;

    fn store(conn: &Connection, project: &str, title: &str, text: &str) -> i64 {
        store_observation_sync(
            conn,
            NewObservation {
                session_id: "s1".to_string(),
                project: project.to_string(),
                obs_type: "research".to_string(),
                title: title.to_string(),
                text: Some(text.to_string()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn filters(project: &str) -> SearchFilters {
        SearchFilters {
            project: Some(project.to_string()),
            limit: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_wraps_terms() {
        assert_eq!(sanitize_fts_query("hello world"), "\"hello\" \"world\"");
    }

    #[test]
    fn test_sanitize_normalizes_smart_quotes() {
        let sanitized = sanitize_fts_query("\u{201C}tokio\u{201D} \u{2018}runtime\u{2019}");
        // Typographic double quotes become ASCII and are doubled inside the
        // wrapping quotes; no raw typographic characters remain.
        assert!(!sanitized.contains('\u{201C}'));
        assert!(!sanitized.contains('\u{2018}'));
        assert!(sanitized.contains("runtime"));
    }

    #[test]
    fn test_sanitize_caps_terms() {
        let long_query = vec!["term"; 150].join(" ");
        let sanitized = sanitize_fts_query(&long_query);
        assert_eq!(sanitized.matches("\"term\"").count(), 100);
    }

    #[test]
    fn test_sanitize_empty() {
        assert_eq!(sanitize_fts_query("   "), "");
    }

    #[test]
    fn test_fts_finds_title_match() {
        let conn = setup_test_connection();
        store(&conn, "p1", "investigated tokio runtime panics", "details here");
        store(&conn, "p1", "unrelated entry", "nothing relevant");

        let hits = search_lexical_with_rank_sync(&conn, "tokio", &filters("p1")).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].rank.is_some());
        assert!(hits[0].observation.title.contains("tokio"));
    }

    #[test]
    fn test_title_outranks_body() {
        let conn = setup_test_connection();
        // Weighted bm25: a title hit must beat a body-only hit
        let title_hit = store(&conn, "p1", "sqlite locking explained", "general notes");
        let body_hit = store(&conn, "p1", "misc notes", "some sqlite trivia in the body");

        let hits = search_lexical_with_rank_sync(&conn, "sqlite", &filters("p1")).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].observation.id, title_hit);
        assert_eq!(hits[1].observation.id, body_hit);
    }

    #[test]
    fn test_project_filter() {
        let conn = setup_test_connection();
        store(&conn, "p1", "tokio notes", "");
        store(&conn, "p2", "tokio notes", "");

        let hits = search_lexical_sync(&conn, "tokio", &filters("p1")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].project, "p1");
    }

    #[test]
    fn test_type_and_epoch_filters() {
        let conn = setup_test_connection();
        let id = store(&conn, "p1", "tokio deep dive", "");
        conn.execute(
            "UPDATE observations SET created_at_epoch = 5000 WHERE id = ?",
            [id],
        )
        .unwrap();

        let mut f = filters("p1");
        f.obs_type = Some("research".to_string());
        f.epoch_from = Some(4000);
        f.epoch_to = Some(6000);
        assert_eq!(search_lexical_sync(&conn, "tokio", &f).unwrap().len(), 1);

        f.epoch_from = Some(6000);
        f.epoch_to = None;
        assert!(search_lexical_sync(&conn, "tokio", &f).unwrap().is_empty());

        f.epoch_from = None;
        f.obs_type = Some("command".to_string());
        assert!(search_lexical_sync(&conn, "tokio", &f).unwrap().is_empty());
    }

    #[test]
    fn test_operator_injection_is_literal() {
        let conn = setup_test_connection();
        store(&conn, "p1", "notes on AND OR NOT parsing", "");

        // FTS operators in user input are quoted, so this must not error
        let hits = search_lexical_sync(&conn, "AND OR NOT", &filters("p1")).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_like_fallback_used_when_fts_unavailable() {
        let conn = setup_test_connection();
        store(&conn, "p1", "greppable unique title", "");

        // Simulate an FTS failure by dropping the virtual table
        conn.execute_batch(
            "DROP TRIGGER observations_fts_ai;
             DROP TRIGGER observations_fts_ad;
             DROP TRIGGER observations_fts_au;
             DROP TABLE observations_fts;",
        )
        .unwrap();

        let hits = search_lexical_with_rank_sync(&conn, "greppable", &filters("p1")).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].rank.is_none(), "LIKE fallback carries no rank");
    }

    #[test]
    fn test_like_fallback_escapes_wildcards() {
        let conn = setup_test_connection();
        store(&conn, "p1", "progress at 100%done", "");
        store(&conn, "p1", "other entry entirely", "");
        conn.execute_batch(
            "DROP TRIGGER observations_fts_ai;
             DROP TRIGGER observations_fts_ad;
             DROP TRIGGER observations_fts_au;
             DROP TABLE observations_fts;",
        )
        .unwrap();

        // '%' must match literally, not as a wildcard
        let hits = search_lexical_sync(&conn, "100%done", &filters("p1")).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].title.contains("100%done"));
    }

    #[test]
    fn test_limit_caps_results() {
        let conn = setup_test_connection();
        for i in 0..5 {
            store(&conn, "p1", &format!("tokio item {i}"), "");
        }
        let mut f = filters("p1");
        f.limit = 2;
        assert_eq!(search_lexical_sync(&conn, "tokio", &f).unwrap().len(), 2);
    }
}
