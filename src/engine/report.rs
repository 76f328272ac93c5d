// src/engine/report.rs
// Aggregate analytics over a time window

use crate::db::pool::DatabasePool;
use crate::error::{MemoryError, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::sync::Arc;

const DAY_MS: i64 = 86_400_000;

/// Named reporting windows ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    Day,
    Week,
    Month,
}

impl ReportPeriod {
    fn millis(self) -> i64 {
        match self {
            ReportPeriod::Day => DAY_MS,
            ReportPeriod::Week => 7 * DAY_MS,
            ReportPeriod::Month => 30 * DAY_MS,
        }
    }
}

/// Either a named period or an explicit epoch range.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    pub period: Option<ReportPeriod>,
    pub start_epoch: Option<i64>,
    pub end_epoch: Option<i64>,
}

/// Aggregate counts for one window.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub observations_total: i64,
    pub observations_by_type: Vec<(String, i64)>,
    pub observations_by_category: Vec<(String, i64)>,
    pub sessions_started: i64,
    pub sessions_completed: i64,
    pub prompts: i64,
    pub summaries: i64,
    pub discovery_tokens: i64,
    pub top_projects: Vec<(String, i64)>,
}

fn resolve_range(opts: &ReportOptions) -> Result<(i64, i64)> {
    let now = chrono::Utc::now().timestamp_millis();
    let (start, end) = match (opts.start_epoch, opts.end_epoch) {
        (Some(start), Some(end)) => (start, end),
        (Some(start), None) => (start, now),
        (None, Some(end)) => {
            let period = opts.period.unwrap_or(ReportPeriod::Week);
            (end - period.millis(), end)
        }
        (None, None) => {
            let period = opts.period.unwrap_or(ReportPeriod::Week);
            (now - period.millis(), now)
        }
    };
    if start >= end {
        return Err(MemoryError::InvalidInput(format!(
            "report range start {start} must be before end {end}"
        )));
    }
    Ok((start, end))
}

/// Build the aggregate report.
pub async fn generate_report(pool: &Arc<DatabasePool>, opts: &ReportOptions) -> Result<Report> {
    let (start, end) = resolve_range(opts)?;
    pool.run(move |conn| build_report_sync(conn, start, end))
        .await
}

fn grouped_counts(
    conn: &Connection,
    sql: &str,
    start: i64,
    end: i64,
) -> rusqlite::Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params![start, end], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

fn build_report_sync(conn: &Connection, start: i64, end: i64) -> Result<Report> {
    let observations_total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM observations WHERE created_at_epoch >= ?1 AND created_at_epoch < ?2",
        params![start, end],
        |r| r.get(0),
    )?;

    let observations_by_type = grouped_counts(
        conn,
        "SELECT type, COUNT(*) FROM observations
         WHERE created_at_epoch >= ?1 AND created_at_epoch < ?2
         GROUP BY type ORDER BY COUNT(*) DESC",
        start,
        end,
    )?;

    let observations_by_category = grouped_counts(
        conn,
        "SELECT auto_category, COUNT(*) FROM observations
         WHERE created_at_epoch >= ?1 AND created_at_epoch < ?2
         GROUP BY auto_category ORDER BY COUNT(*) DESC",
        start,
        end,
    )?;

    let sessions_started: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE started_at_epoch >= ?1 AND started_at_epoch < ?2",
        params![start, end],
        |r| r.get(0),
    )?;

    let sessions_completed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sessions
         WHERE status = 'completed' AND completed_at_epoch >= ?1 AND completed_at_epoch < ?2",
        params![start, end],
        |r| r.get(0),
    )?;

    let prompts: i64 = conn.query_row(
        "SELECT COUNT(*) FROM prompts WHERE created_at_epoch >= ?1 AND created_at_epoch < ?2",
        params![start, end],
        |r| r.get(0),
    )?;

    let summaries: i64 = conn.query_row(
        "SELECT COUNT(*) FROM summaries WHERE created_at_epoch >= ?1 AND created_at_epoch < ?2",
        params![start, end],
        |r| r.get(0),
    )?;

    let discovery_tokens: i64 = conn.query_row(
        "SELECT COALESCE(SUM(discovery_tokens), 0) FROM observations
         WHERE created_at_epoch >= ?1 AND created_at_epoch < ?2",
        params![start, end],
        |r| r.get(0),
    )?;

    let top_projects = grouped_counts(
        conn,
        "SELECT project, COUNT(*) FROM observations
         WHERE created_at_epoch >= ?1 AND created_at_epoch < ?2
         GROUP BY project ORDER BY COUNT(*) DESC LIMIT 5",
        start,
        end,
    )?;

    Ok(Report {
        start_epoch: start,
        end_epoch: end,
        observations_total,
        observations_by_type,
        observations_by_category,
        sessions_started,
        sessions_completed,
        prompts,
        summaries,
        discovery_tokens,
        top_projects,
    })
}
