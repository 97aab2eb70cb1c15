use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default number of times a displaced unit re-pins its shard
pub const DEFAULT_MAX_REPIN_ATTEMPTS: u32 = 3;

/// Engine configuration.
///
/// This struct is serialized to TOML and saved at `~/.shard-engine/engine.toml`.
///
/// # Examples
///
/// ```no_run
/// use shard_engine::EngineConfig;
///
/// let config = EngineConfig::default();
/// let path = EngineConfig::default_path().unwrap();
/// config.save(&path).unwrap();
///
/// let loaded = EngineConfig::load(&path).unwrap();
/// assert_eq!(config.models_dir, loaded.models_dir);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one artifact directory per model id
    pub models_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub log_level: String,

    /// Directory for rotating log files (stderr only when unset)
    pub log_dir: Option<PathBuf>,

    /// Name of the worker thread
    pub worker_thread_name: String,

    /// How often a unit may re-pin its shard after being displaced by a
    /// concurrent transition
    pub max_repin_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shard-engine");

        Self {
            models_dir: base.join("models"),
            log_level: "info".to_string(),
            log_dir: None,
            worker_thread_name: "shard-worker".to_string(),
            max_repin_attempts: DEFAULT_MAX_REPIN_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    /// Get default configuration file path: `~/.shard-engine/engine.toml`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if home directory cannot be determined.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".shard-engine").join("engine.toml"))
    }

    /// Save configuration to file.
    ///
    /// Creates parent directories if they don't exist.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                tracing::error!(
                    path = %parent.display(),
                    error = %e,
                    "Failed to create config directory"
                );
                e
            })?;
        }

        let toml_string = toml::to_string_pretty(self)?;

        let temp_path = path.with_extension("toml.tmp");
        fs::write(&temp_path, &toml_string).map_err(|e| {
            tracing::error!(
                path = %temp_path.display(),
                error = %e,
                "Failed to write temp config file"
            );
            e
        })?;

        fs::rename(&temp_path, path).map_err(|e| {
            tracing::error!(
                from = %temp_path.display(),
                to = %path.display(),
                error = %e,
                "Failed to rename temp config file"
            );
            e
        })?;

        tracing::info!(path = %path.display(), "Engine configuration saved");
        Ok(())
    }

    /// Load configuration from file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to read config file"
            );
            e
        })?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;

        tracing::info!(
            path = %path.display(),
            models_dir = %config.models_dir.display(),
            "Engine configuration loaded"
        );

        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker_thread_name.trim().is_empty() {
            return Err(EngineError::Config(
                "worker_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().expect("temp dir");
        let config_path = temp_dir.path().join("nested").join("engine.toml");

        let original = EngineConfig {
            models_dir: temp_dir.path().join("models"),
            log_level: "debug".to_string(),
            log_dir: Some(temp_dir.path().join("logs")),
            worker_thread_name: "w0".to_string(),
            max_repin_attempts: 5,
        };
        original.save(&config_path).expect("save should succeed");
        assert!(!config_path.with_extension("toml.tmp").exists());

        let loaded = EngineConfig::load(&config_path).expect("load should succeed");
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().expect("temp dir");
        let config_path = temp_dir.path().join("engine.toml");
        std::fs::write(&config_path, "log_level = \"warn\"\n").unwrap();

        let loaded = EngineConfig::load(&config_path).unwrap();
        assert_eq!(loaded.log_level, "warn");
        assert_eq!(loaded.max_repin_attempts, DEFAULT_MAX_REPIN_ATTEMPTS);
        assert_eq!(loaded.worker_thread_name, "shard-worker");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_dir = TempDir::new().expect("temp dir");
        let config_path = temp_dir.path().join("engine.toml");

        std::fs::write(&config_path, "max_repin_attempts = \"many\"\n").unwrap();
        assert!(matches!(
            EngineConfig::load(&config_path),
            Err(EngineError::Serialization(_))
        ));

        std::fs::write(&config_path, "worker_thread_name = \"  \"\n").unwrap();
        assert!(matches!(
            EngineConfig::load(&config_path),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_load_or_default() {
        let temp_dir = TempDir::new().expect("temp dir");
        let missing = temp_dir.path().join("missing.toml");
        assert_eq!(
            EngineConfig::load_or_default(&missing).unwrap(),
            EngineConfig::default()
        );
    }

    #[test]
    fn test_default_path() {
        let path = EngineConfig::default_path().unwrap();
        assert!(path.to_string_lossy().ends_with("engine.toml"));
    }
}
