//! Collaborator boundaries for making a shard resident
//!
//! The engine never downloads, parses weights or tokenizes on its own. It
//! drives three capabilities supplied by the embedding application:
//!
//! - [`ShardResolver`]: async, maps a [`Shard`] to a local [`ModelArtifact`]
//! - [`ModelLoader`]: builds a [`LoadedModel`] from an artifact; runs on the worker
//! - [`Tokenizer`] / [`ShardForward`]: the loaded capabilities, only ever
//!   invoked from the worker thread

use crate::errors::{EngineError, ShardError};
use crate::inference::input::ImageInput;
use crate::inference::kv_cache::{KvCache, KvCacheConfig};
use crate::inference::tensor::Tensor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::shard::Shard;

/// Local model artifact produced by a resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    path: PathBuf,
}

impl ModelArtifact {
    /// Wrap a local path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the artifact on disk
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Maps a shard to a local artifact, downloading or caching as needed
#[async_trait]
pub trait ShardResolver: Send + Sync {
    /// Resolve the artifact for `shard`
    ///
    /// May perform network or disk I/O; failures are reported as
    /// [`ShardError::Resolution`].
    async fn resolve(&self, shard: &Shard) -> Result<ModelArtifact, ShardError>;
}

/// Builds tokenizer and weights for a shard
///
/// Called on the worker thread, so implementations may block.
pub trait ModelLoader: Send + Sync {
    /// Load the shard's tokenizer and weights from `artifact`
    ///
    /// Failures (including incompatible shard boundaries) are reported as
    /// [`ShardError::Load`].
    fn load(&self, artifact: &ModelArtifact, shard: &Shard) -> Result<LoadedModel, ShardError>;
}

/// Text (and image) encoder for a loaded model
pub trait Tokenizer: Send {
    /// Encode a prompt into a `[1, seq]` token id tensor
    fn encode(&mut self, text: &str) -> Result<Tensor, EngineError>;

    /// Jointly encode a prompt and an image into (token ids, pixel values)
    fn encode_with_image(
        &mut self,
        text: &str,
        image: &ImageInput,
    ) -> Result<(Tensor, Tensor), EngineError>;

    /// Token id that ends generation
    fn eos_token_id(&self) -> u32;
}

/// Forward pass over a shard's layers
pub trait ShardForward: Send {
    /// Shape of the per-request cache this forward pass expects
    fn cache_config(&self) -> KvCacheConfig;

    /// Run the shard's layers over `input`, reading and extending `cache`
    fn forward(
        &mut self,
        input: &Tensor,
        pixel_values: Option<&Tensor>,
        cache: &mut KvCache,
    ) -> Result<Tensor, EngineError>;

    /// Approximate weight memory in bytes
    fn memory_usage(&self) -> usize {
        0
    }
}

/// Tokenizer and weights bound to one shard
pub struct LoadedModel {
    /// Encoder for prompts and images
    pub tokenizer: Box<dyn Tokenizer>,
    /// Weights of the shard's layers
    pub weights: Box<dyn ShardForward>,
}

impl LoadedModel {
    /// Pair a tokenizer with weights
    pub fn new(tokenizer: Box<dyn Tokenizer>, weights: Box<dyn ShardForward>) -> Self {
        Self { tokenizer, weights }
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("eos_token_id", &self.tokenizer.eos_token_id())
            .field("memory_usage", &self.weights.memory_usage())
            .finish()
    }
}
