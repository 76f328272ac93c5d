// src/db/types.rs
// Entity record types returned by database operations

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Knowledge types: observation types that carry durable decisions rather
/// than transient activity. These receive ranking boosts and a separate
/// retention family.
pub const KNOWLEDGE_TYPES: [&str; 4] = ["constraint", "decision", "heuristic", "rejected"];

/// True if the observation type is one of the knowledge types.
pub fn is_knowledge_type(obs_type: &str) -> bool {
    KNOWLEDGE_TYPES.contains(&obs_type)
}

/// Per-type dedup window in milliseconds, sized to each hook's cadence:
/// file reads repeat fast, research is slow.
pub fn dedup_window_ms(obs_type: &str) -> i64 {
    match obs_type {
        "file-read" => 60_000,
        "file-write" => 10_000,
        "command" => 30_000,
        "research" => 120_000,
        "delegation" => 60_000,
        _ => 30_000,
    }
}

/// One atomic record of a hook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub session_id: String,
    pub project: String,
    #[serde(rename = "type")]
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
    pub content_hash: String,
    pub discovery_tokens: i64,
    pub auto_category: String,
    pub last_accessed_epoch: Option<i64>,
    pub stale: bool,
    pub created_at: String,
    pub created_at_epoch: i64,
}

/// End-of-session digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub session_id: String,
    pub project: String,
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub created_at_epoch: i64,
}

/// One user-issued prompt within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: i64,
    pub content_session_id: String,
    pub prompt_number: i64,
    pub text: String,
    pub project: Option<String>,
    pub created_at: String,
    pub created_at_epoch: i64,
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

/// Session lifecycle record. The project and the opaque external session id
/// are immutable once set.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub content_session_id: String,
    pub project: String,
    pub status: String,
    pub started_at: String,
    pub started_at_epoch: i64,
    pub completed_at: Option<String>,
    pub completed_at_epoch: Option<i64>,
}

/// Structured resumption point attached to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub session_id: String,
    pub project: String,
    pub task: String,
    pub progress: Option<String>,
    pub next_steps: Option<String>,
    pub open_questions: Option<String>,
    pub relevant_files: Option<String>,
    pub context_snapshot: Option<String>,
    pub created_at: String,
    pub created_at_epoch: i64,
}

/// Project display alias.
#[derive(Debug, Clone)]
pub struct ProjectAlias {
    pub id: i64,
    pub project_name: String,
    pub display_name: String,
}

/// Cross-reference to an external GitHub repo/issue/PR.
#[derive(Debug, Clone)]
pub struct GithubLink {
    pub id: i64,
    pub observation_id: Option<i64>,
    pub session_id: Option<String>,
    pub repo: String,
    pub kind: String,
    pub number: Option<i64>,
    pub url: Option<String>,
    pub created_at: String,
}

/// Knowledge metadata stored in the `facts` column of knowledge-type
/// observations. Serialized as tagged JSON so the knowledge type survives a
/// round-trip even when the observation row's type column is rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "knowledge_type", rename_all = "lowercase")]
pub enum KnowledgeMeta {
    Constraint {
        #[serde(skip_serializing_if = "Option::is_none")]
        importance: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
    Decision {
        #[serde(skip_serializing_if = "Option::is_none")]
        importance: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        alternatives: Option<String>,
    },
    Heuristic {
        #[serde(skip_serializing_if = "Option::is_none")]
        importance: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },
    Rejected {
        #[serde(skip_serializing_if = "Option::is_none")]
        importance: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl KnowledgeMeta {
    /// Build metadata for a knowledge type name, or None for unknown types.
    pub fn new(knowledge_type: &str, importance: Option<u8>) -> Option<Self> {
        match knowledge_type {
            "constraint" => Some(Self::Constraint {
                importance,
                scope: None,
            }),
            "decision" => Some(Self::Decision {
                importance,
                alternatives: None,
            }),
            "heuristic" => Some(Self::Heuristic {
                importance,
                confidence: None,
            }),
            "rejected" => Some(Self::Rejected {
                importance,
                reason: None,
            }),
            _ => None,
        }
    }

    pub fn importance(&self) -> Option<u8> {
        match self {
            Self::Constraint { importance, .. }
            | Self::Decision { importance, .. }
            | Self::Heuristic { importance, .. }
            | Self::Rejected { importance, .. } => *importance,
        }
    }
}
