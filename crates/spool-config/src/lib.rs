//! Configuration management for the spool daemon
//!
//! File-based TOML configuration with environment overrides and a
//! validation pass. All runtime artifacts (socket, lock file, queue
//! database, pool file) default to paths under one runtime directory so
//! a test instance is fully relocatable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Result alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// One cartridge definition for the simulated library backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeConfig {
    /// Cartridge barcode.
    pub id: String,
    /// Capacity in MiB.
    pub capacity_mib: u64,
}

/// Library backend selection and layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Backend kind; only the directory-backed `sim` backend ships
    /// in-tree, the LTFS wrapper is wired up out of tree.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Root directory of the simulated library.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Number of drives the simulated library exposes.
    #[serde(default = "default_drives")]
    pub drives: u32,
    /// Cartridges of the simulated library.
    #[serde(default)]
    pub tapes: Vec<TapeConfig>,
}

fn default_backend() -> String {
    "sim".to_string()
}

const fn default_drives() -> u32 {
    2
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: None,
            drives: default_drives(),
            tapes: Vec::new(),
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding socket, lock file, queue database and pool file.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
    /// Log filter, `tracing_subscriber::EnvFilter` syntax.
    #[serde(default = "default_log")]
    pub log: String,
    /// Library backend.
    #[serde(default)]
    pub library: LibraryConfig,
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from("/run/spool")
}

fn default_log() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            runtime_dir: default_runtime_dir(),
            log: default_log(),
            library: LibraryConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from a TOML file, then apply environment overrides and
    /// validate. A missing `path` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        debug!(runtime_dir = %config.runtime_dir.display(), "configuration loaded");
        Ok(config)
    }

    /// Environment overrides, highest precedence.
    fn apply_env(&mut self) {
        if let Ok(dir) = env::var("SPOOL_RUNTIME_DIR") {
            self.runtime_dir = PathBuf::from(dir);
        }
        if let Ok(log) = env::var("SPOOL_LOG") {
            self.log = log;
        }
        if let Ok(root) = env::var("SPOOL_LIBRARY_ROOT") {
            self.library.root = Some(PathBuf::from(root));
        }
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.runtime_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("runtime_dir is empty".into()));
        }
        if self.library.backend != "sim" {
            return Err(ConfigError::Validation(format!(
                "unknown library backend: {}",
                self.library.backend
            )));
        }
        if self.library.drives == 0 {
            return Err(ConfigError::Validation(
                "library needs at least one drive".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for tape in &self.library.tapes {
            if tape.id.is_empty() {
                return Err(ConfigError::Validation("empty tape id".into()));
            }
            if tape.capacity_mib == 0 {
                return Err(ConfigError::Validation(format!(
                    "tape {} has zero capacity",
                    tape.id
                )));
            }
            if !seen.insert(&tape.id) {
                return Err(ConfigError::Validation(format!(
                    "duplicate tape id: {}",
                    tape.id
                )));
            }
        }
        Ok(())
    }

    /// Unix socket the daemon listens on.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join("spoold.sock")
    }

    /// Advisory lock file signalling daemon liveness.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.runtime_dir.join("spoold.lock")
    }

    /// SQLite queue database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.runtime_dir.join("queue.db")
    }

    /// Pool membership file.
    #[must_use]
    pub fn pools_path(&self) -> PathBuf {
        self.runtime_dir.join("pools")
    }

    /// Session key file; written by the daemon, read by clients.
    #[must_use]
    pub fn key_path(&self) -> PathBuf {
        self.runtime_dir.join("spoold.key")
    }

    /// Root of the simulated library, defaulting under the runtime dir.
    #[must_use]
    pub fn library_root(&self) -> PathBuf {
        self.library
            .root
            .clone()
            .unwrap_or_else(|| self.runtime_dir.join("library"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_path(), PathBuf::from("/run/spool/spoold.sock"));
        assert_eq!(config.db_path(), PathBuf::from("/run/spool/queue.db"));
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("spool.toml");
        fs::write(
            &path,
            r#"
runtime_dir = "/tmp/spool-test"
log = "debug"

[library]
drives = 4

[[library.tapes]]
id = "T00001"
capacity_mib = 2048
"#,
        )
        .unwrap();
        let config = DaemonConfig::load(Some(&path)).unwrap();
        assert_eq!(config.runtime_dir, PathBuf::from("/tmp/spool-test"));
        assert_eq!(config.log, "debug");
        assert_eq!(config.library.drives, 4);
        assert_eq!(config.library.tapes.len(), 1);
        assert_eq!(config.library.tapes[0].capacity_mib, 2048);
    }

    #[test]
    fn test_zero_drives_rejected() {
        let config = DaemonConfig {
            library: LibraryConfig {
                drives: 0,
                ..LibraryConfig::default()
            },
            ..DaemonConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_tape_ids_rejected() {
        let config = DaemonConfig {
            library: LibraryConfig {
                tapes: vec![
                    TapeConfig { id: "T1".into(), capacity_mib: 1 },
                    TapeConfig { id: "T1".into(), capacity_mib: 1 },
                ],
                ..LibraryConfig::default()
            },
            ..DaemonConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let config = DaemonConfig {
            library: LibraryConfig {
                backend: "ltfs".into(),
                ..LibraryConfig::default()
            },
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
