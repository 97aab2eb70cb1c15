use crate::errors::ShardError;
use crate::model::loader::{ModelArtifact, ShardResolver};
use crate::model::shard::Shard;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::config::CONFIG_FILE;

/// Resolves model ids to artifact directories under a local models directory
///
/// `models_dir/<model_id>/config.json` must exist; nothing is downloaded.
#[derive(Debug, Clone)]
pub struct LocalShardResolver {
    models_dir: PathBuf,
}

impl LocalShardResolver {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Directory that holds the artifact for `model_id`
    pub fn artifact_dir(&self, model_id: &str) -> PathBuf {
        self.models_dir.join(model_id)
    }
}

#[async_trait]
impl ShardResolver for LocalShardResolver {
    async fn resolve(&self, shard: &Shard) -> Result<ModelArtifact, ShardError> {
        if shard.model_id.is_empty()
            || shard.model_id.contains(['/', '\\'])
            || shard.model_id == ".."
        {
            return Err(ShardError::Resolution(format!(
                "invalid model id {:?}",
                shard.model_id
            )));
        }

        let dir = self.artifact_dir(&shard.model_id);
        let config_path = dir.join(CONFIG_FILE);

        match tokio::fs::metadata(&config_path).await {
            Ok(meta) if meta.is_file() => {
                tracing::debug!(shard = %shard, path = %dir.display(), "Resolved shard artifact");
                Ok(ModelArtifact::new(dir))
            }
            Ok(_) => Err(ShardError::Resolution(format!(
                "{} is not a file",
                config_path.display()
            ))),
            Err(e) => Err(ShardError::Resolution(format!(
                "no artifact for model {} at {}: {}",
                shard.model_id,
                dir.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::config::ReferenceModelConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_resolves_existing_artifact() {
        let temp_dir = TempDir::new().unwrap();
        ReferenceModelConfig::default()
            .write_artifact(&temp_dir.path().join("m"))
            .unwrap();

        let resolver = LocalShardResolver::new(temp_dir.path());
        let artifact = resolver.resolve(&Shard::new("m", 0, 4, 8)).await.unwrap();
        assert_eq!(artifact.path(), temp_dir.path().join("m"));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_resolution_error() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = LocalShardResolver::new(temp_dir.path());

        let err = resolver.resolve(&Shard::new("absent", 0, 4, 8)).await.unwrap_err();
        assert!(matches!(err, ShardError::Resolution(_)));
    }

    #[tokio::test]
    async fn test_path_like_model_id_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = LocalShardResolver::new(temp_dir.path());

        for id in ["", "..", "a/b"] {
            let err = resolver.resolve(&Shard::new(id, 0, 1, 1)).await.unwrap_err();
            assert!(matches!(err, ShardError::Resolution(_)));
        }
    }
}
