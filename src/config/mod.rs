// src/config/mod.rs
// Configuration: environment variables, data directory layout, settings.json

mod env;
mod file;

pub use env::{EmbeddingsConfig, ProviderKeys};
pub use file::{RetentionPolicy, Settings};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Database file name inside the data directory.
pub const DB_FILE: &str = "kiro-memory.db";

/// Settings file name inside the data directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Resolved data directory layout.
///
/// Defaults to `~/.kiro-memory`, overridable via `KIRO_DATA_DIR`. The
/// subdirectories `vector-db/` and `observer-sessions/` are reserved for
/// external collaborators and only created, never read by the engine.
#[derive(Debug, Clone)]
pub struct DataDirs {
    pub root: PathBuf,
}

impl DataDirs {
    /// Resolve from the environment, falling back to `~/.kiro-memory`.
    pub fn from_env() -> Result<Self> {
        if let Ok(dir) = std::env::var("KIRO_DATA_DIR") {
            if !dir.trim().is_empty() {
                return Ok(Self {
                    root: PathBuf::from(dir),
                });
            }
        }
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(Self {
            root: home.join(".kiro-memory"),
        })
    }

    /// Use an explicit root (tests, embedded deployments).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    /// Create the full directory layout with restrictive permissions.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.backups_dir(),
            self.logs_dir(),
            self.root.join("vector-db"),
            self.root.join("observer-sessions"),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            restrict_dir_permissions(&dir);
        }
        Ok(())
    }

    /// Load settings.json, returning defaults when absent or unreadable.
    pub fn load_settings(&self) -> Settings {
        Settings::load(&self.settings_path())
    }
}

/// Restrict a directory to owner-only access on Unix (best effort).
fn restrict_dir_permissions(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(metadata) = std::fs::metadata(dir) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o700);
            if let Err(e) = std::fs::set_permissions(dir, perms) {
                tracing::warn!("Failed to restrict permissions on {}: {}", dir.display(), e);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}
