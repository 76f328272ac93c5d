// src/config/file.rs
// Persisted settings (settings.json in the data directory)

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-family retention policy in days. A value <= 0 disables that family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub observations_max_age_days: i64,
    pub summaries_max_age_days: i64,
    pub prompts_max_age_days: i64,
    pub knowledge_max_age_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            observations_max_age_days: 90,
            summaries_max_age_days: 180,
            prompts_max_age_days: 90,
            knowledge_max_age_days: 365,
        }
    }
}

/// Persisted engine settings. Missing file or unknown fields never fail;
/// every field has a default so older settings files keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retention: RetentionPolicy,
    /// Backups kept by rotation.
    pub backup_max_keep: usize,
    /// Preferred embedding provider ("openai" | "ollama" | "auto").
    pub embedding_provider: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            backup_max_keep: 10,
            embedding_provider: "auto".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a file, falling back to defaults when the file is
    /// missing or malformed (a bad settings file must not brick the engine).
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!("Malformed {}: {} - using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist settings as pretty JSON.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.retention.observations_max_age_days, 90);
        assert_eq!(s.backup_max_keep, 10);
        assert_eq!(s.embedding_provider, "auto");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let s = Settings::load(Path::new("/nonexistent/settings.json"));
        assert_eq!(s.backup_max_keep, 10);
    }

    #[test]
    fn test_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        let mut s = Settings::default();
        s.backup_max_keep = 3;
        s.retention.prompts_max_age_days = 0;
        s.save(&path).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded.backup_max_keep, 3);
        assert_eq!(loaded.retention.prompts_max_age_days, 0);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, r#"{"backup_max_keep": 5}"#).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded.backup_max_keep, 5);
        assert_eq!(loaded.retention.observations_max_age_days, 90);
    }
}
