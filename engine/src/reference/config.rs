//! Reference model artifact layout
//!
//! An artifact directory holds a single `config.json` describing the model;
//! weights are derived from its seed when a shard is loaded.

use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the model description inside an artifact directory
pub const CONFIG_FILE: &str = "config.json";

/// Description of a reference model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceModelConfig {
    /// Hidden dimension size
    pub hidden_dim: usize,

    /// Vocabulary size
    pub vocab_size: usize,

    /// Number of transformer layers
    pub num_layers: u32,

    /// Token id that ends generation
    pub eos_token_id: u32,

    /// Seed for deterministic weight generation
    pub seed: u64,

    /// Maximum positions cached per request
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,
}

fn default_max_seq_len() -> usize {
    2048
}

impl Default for ReferenceModelConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 64,
            vocab_size: 512,
            num_layers: 8,
            eos_token_id: super::tokenizer::EOS_TOKEN_ID,
            seed: 12345,
            max_seq_len: default_max_seq_len(),
        }
    }
}

impl ReferenceModelConfig {
    /// Read `config.json` from an artifact directory
    pub fn read_artifact(dir: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(dir.join(CONFIG_FILE))?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write `config.json` into an artifact directory, creating it
    pub fn write_artifact(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        std::fs::create_dir_all(dir)?;
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE), data)?;
        tracing::info!(dir = %dir.display(), "Wrote reference model artifact");
        Ok(())
    }

    /// Reject configurations the reference model cannot run
    pub fn validate(&self) -> Result<()> {
        if self.hidden_dim == 0 {
            return Err(EngineError::Config("hidden_dim must be positive".to_string()));
        }
        if self.num_layers == 0 {
            return Err(EngineError::Config("num_layers must be positive".to_string()));
        }
        if self.vocab_size < super::tokenizer::MIN_VOCAB_SIZE {
            return Err(EngineError::Config(format!(
                "vocab_size {} is below the byte tokenizer minimum of {}",
                self.vocab_size,
                super::tokenizer::MIN_VOCAB_SIZE
            )));
        }
        if self.eos_token_id as usize >= self.vocab_size {
            return Err(EngineError::Config(format!(
                "eos_token_id {} is outside the vocabulary",
                self.eos_token_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("m");
        let config = ReferenceModelConfig {
            seed: 7,
            ..Default::default()
        };

        config.write_artifact(&dir).unwrap();
        assert_eq!(ReferenceModelConfig::read_artifact(&dir).unwrap(), config);
    }

    #[test]
    fn test_missing_max_seq_len_defaults() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE),
            r#"{"hidden_dim": 8, "vocab_size": 300, "num_layers": 2, "eos_token_id": 2, "seed": 1}"#,
        )
        .unwrap();

        let config = ReferenceModelConfig::read_artifact(temp_dir.path()).unwrap();
        assert_eq!(config.max_seq_len, 2048);
    }

    #[test]
    fn test_validate() {
        let small_vocab = ReferenceModelConfig {
            vocab_size: 100,
            ..Default::default()
        };
        assert!(small_vocab.validate().is_err());

        let bad_eos = ReferenceModelConfig {
            eos_token_id: 512,
            ..Default::default()
        };
        assert!(bad_eos.validate().is_err());

        assert!(ReferenceModelConfig::default().validate().is_ok());
    }
}
