use crate::errors::ShardError;
use crate::model::loader::{LoadedModel, ModelArtifact, ModelLoader};
use crate::model::shard::Shard;

use super::config::ReferenceModelConfig;
use super::tokenizer::ByteTokenizer;
use super::weights::ReferenceWeights;

/// Builds a [`ByteTokenizer`] and [`ReferenceWeights`] from an artifact
#[derive(Debug, Clone, Default)]
pub struct ReferenceLoader;

impl ReferenceLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModelLoader for ReferenceLoader {
    fn load(&self, artifact: &ModelArtifact, shard: &Shard) -> Result<LoadedModel, ShardError> {
        let config = ReferenceModelConfig::read_artifact(artifact.path()).map_err(|e| {
            ShardError::Load(format!(
                "failed to read model config from {}: {}",
                artifact.path().display(),
                e
            ))
        })?;

        shard.validate()?;
        if shard.total_layers != config.num_layers {
            return Err(ShardError::Load(format!(
                "incompatible shard boundaries: shard {} assumes {} layers but model has {}",
                shard, shard.total_layers, config.num_layers
            )));
        }

        tracing::info!(
            shard = %shard,
            hidden_dim = config.hidden_dim,
            vocab_size = config.vocab_size,
            "Generating reference weights"
        );

        let tokenizer = ByteTokenizer::new(config.eos_token_id);
        let weights = ReferenceWeights::generate(&config, shard);
        Ok(LoadedModel::new(Box::new(tokenizer), Box::new(weights)))
    }
}
