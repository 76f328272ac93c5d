// src/db/retention.rs
//! Retention sweep: delete rows older than per-family thresholds.
//!
//! Observations are partitioned at the threshold into non-knowledge and
//! knowledge families; knowledge rows whose facts carry importance 4 or 5
//! are exempt regardless of age. A max-age value <= 0 disables the family.
//! The entire sweep runs in one transaction.

use crate::config::RetentionPolicy;
use crate::db::types::KNOWLEDGE_TYPES;
use crate::error::Result;
use rusqlite::{params, Connection};

/// Per-family deletion counts for one sweep.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RetentionReport {
    pub observations: usize,
    pub summaries: usize,
    pub prompts: usize,
    pub knowledge: usize,
    pub executed_at: String,
}

const DAY_MS: i64 = 86_400_000;

fn threshold(now_ms: i64, max_age_days: i64) -> Option<i64> {
    if max_age_days <= 0 {
        None
    } else {
        Some(now_ms - max_age_days * DAY_MS)
    }
}

/// SQL fragment listing the knowledge types for IN / NOT IN clauses.
fn knowledge_type_list() -> String {
    KNOWLEDGE_TYPES
        .iter()
        .map(|t| format!("'{t}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Exemption clause: facts carrying importance 4 or 5. Substring match on
/// the serialized JSON, anchored to the key form (with or without a space
/// after the colon) rather than a full parse.
const IMPORTANCE_EXEMPT: &str = "(facts IS NOT NULL AND (\
     facts LIKE '%\"importance\":4%' OR facts LIKE '%\"importance\": 4%' OR \
     facts LIKE '%\"importance\":5%' OR facts LIKE '%\"importance\": 5%'))";

/// Apply the retention policy. Returns per-family deletion counts.
pub fn apply_retention_sync(conn: &Connection, policy: &RetentionPolicy) -> Result<RetentionReport> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let tx = conn.unchecked_transaction()?;

    let knowledge_list = knowledge_type_list();

    let observations = match threshold(now_ms, policy.observations_max_age_days) {
        Some(cutoff) => tx.execute(
            &format!(
                "DELETE FROM observations
                 WHERE created_at_epoch < ?1 AND type NOT IN ({knowledge_list})"
            ),
            params![cutoff],
        )?,
        None => 0,
    };

    let knowledge = match threshold(now_ms, policy.knowledge_max_age_days) {
        Some(cutoff) => tx.execute(
            &format!(
                "DELETE FROM observations
                 WHERE created_at_epoch < ?1 AND type IN ({knowledge_list})
                   AND NOT {IMPORTANCE_EXEMPT}"
            ),
            params![cutoff],
        )?,
        None => 0,
    };

    let summaries = match threshold(now_ms, policy.summaries_max_age_days) {
        Some(cutoff) => tx.execute(
            "DELETE FROM summaries WHERE created_at_epoch < ?1",
            params![cutoff],
        )?,
        None => 0,
    };

    let prompts = match threshold(now_ms, policy.prompts_max_age_days) {
        Some(cutoff) => tx.execute(
            "DELETE FROM prompts WHERE created_at_epoch < ?1",
            params![cutoff],
        )?,
        None => 0,
    };

    tx.commit()?;

    let report = RetentionReport {
        observations,
        summaries,
        prompts,
        knowledge,
        executed_at: chrono::Utc::now().to_rfc3339(),
    };

    if observations + summaries + prompts + knowledge > 0 {
        tracing::info!(
            observations,
            summaries,
            prompts,
            knowledge,
            "Retention sweep deleted rows"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::observations::{store_observation_sync, NewObservation};
    use crate::db::sessions::{store_prompt_sync, store_summary_sync, NewSummary};
    use crate::db::test_support::setup_test_connection;

    fn policy(obs: i64, sums: i64, prompts: i64, knowledge: i64) -> RetentionPolicy {
        RetentionPolicy {
            observations_max_age_days: obs,
            summaries_max_age_days: sums,
            prompts_max_age_days: prompts,
            knowledge_max_age_days: knowledge,
        }
    }

    fn store_aged(conn: &Connection, obs_type: &str, title: &str, facts: Option<&str>, days_old: i64) -> i64 {
        let id = store_observation_sync(
            conn,
            NewObservation {
                session_id: "s1".to_string(),
                project: "p1".to_string(),
                obs_type: obs_type.to_string(),
                title: title.to_string(),
                facts: facts.map(str::to_string),
                ..Default::default()
            },
        )
        .unwrap();
        let epoch = chrono::Utc::now().timestamp_millis() - days_old * DAY_MS;
        conn.execute(
            "UPDATE observations SET created_at_epoch = ? WHERE id = ?",
            params![epoch, id],
        )
        .unwrap();
        id
    }

    fn count_observations(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM observations", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_old_observation_deleted_knowledge_importance_survives() {
        let conn = setup_test_connection();
        store_aged(&conn, "command", "old normal", None, 40);
        let keeper = store_aged(
            &conn,
            "decision",
            "old but important",
            Some(r#"{"knowledge_type":"decision","importance":5}"#),
            40,
        );

        let report = apply_retention_sync(&conn, &policy(30, 0, 0, 0)).unwrap();
        assert_eq!(report.observations, 1);
        assert_eq!(report.summaries, 0);
        assert_eq!(report.prompts, 0);
        assert_eq!(report.knowledge, 0);

        assert_eq!(count_observations(&conn), 1);
        let survivor = crate::db::observations::get_observation_sync(&conn, keeper).unwrap();
        assert!(survivor.is_some());
    }

    #[test]
    fn test_importance_exemption_across_knowledge_sweep() {
        let conn = setup_test_connection();
        let exempt = store_aged(
            &conn,
            "constraint",
            "load-bearing rule",
            Some(r#"{"knowledge_type":"constraint","importance": 5}"#),
            400,
        );
        store_aged(
            &conn,
            "heuristic",
            "forgettable hunch",
            Some(r#"{"knowledge_type":"heuristic","importance":2}"#),
            400,
        );

        let report = apply_retention_sync(&conn, &policy(0, 0, 0, 365)).unwrap();
        assert_eq!(report.knowledge, 1);
        assert!(crate::db::observations::get_observation_sync(&conn, exempt)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_importance_four_also_exempt() {
        let conn = setup_test_connection();
        store_aged(
            &conn,
            "decision",
            "fairly important",
            Some(r#"{"knowledge_type":"decision","importance":4}"#),
            400,
        );
        let report = apply_retention_sync(&conn, &policy(0, 0, 0, 365)).unwrap();
        assert_eq!(report.knowledge, 0);
        assert_eq!(count_observations(&conn), 1);
    }

    #[test]
    fn test_zero_disables_family() {
        let conn = setup_test_connection();
        store_aged(&conn, "command", "ancient", None, 1000);

        let report = apply_retention_sync(&conn, &policy(0, 0, 0, 0)).unwrap();
        assert_eq!(report.observations, 0);
        assert_eq!(count_observations(&conn), 1);
    }

    #[test]
    fn test_fresh_rows_survive() {
        let conn = setup_test_connection();
        store_aged(&conn, "command", "yesterday", None, 1);
        let report = apply_retention_sync(&conn, &policy(30, 30, 30, 30)).unwrap();
        assert_eq!(report.observations, 0);
        assert_eq!(count_observations(&conn), 1);
    }

    #[test]
    fn test_summaries_and_prompts_swept() {
        let conn = setup_test_connection();
        store_summary_sync(
            &conn,
            NewSummary {
                session_id: "s1".to_string(),
                project: "p1".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        store_prompt_sync(&conn, "s1", 1, "do the thing", Some("p1")).unwrap();

        let old_epoch = chrono::Utc::now().timestamp_millis() - 200 * DAY_MS;
        conn.execute("UPDATE summaries SET created_at_epoch = ?", [old_epoch])
            .unwrap();
        conn.execute("UPDATE prompts SET created_at_epoch = ?", [old_epoch])
            .unwrap();

        let report = apply_retention_sync(&conn, &policy(0, 90, 90, 0)).unwrap();
        assert_eq!(report.summaries, 1);
        assert_eq!(report.prompts, 1);
    }

    #[test]
    fn test_retained_knowledge_not_counted_as_observation() {
        // Knowledge rows are out of scope for the observations family even
        // when older than its threshold
        let conn = setup_test_connection();
        store_aged(&conn, "decision", "old decision", None, 40);

        let report = apply_retention_sync(&conn, &policy(30, 0, 0, 0)).unwrap();
        assert_eq!(report.observations, 0);
        assert_eq!(count_observations(&conn), 1);
    }
}
