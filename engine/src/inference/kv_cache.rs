//! Per-request generation state
//!
//! Each request id owns one [`KvCache`] holding, for every layer of the
//! resident shard, the key and value rows of all positions seen so far.
//! Feeding a request more tokens appends to its cache, which is what makes
//! a step non-idempotent.

use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a request's KV cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvCacheConfig {
    /// First absolute layer index covered by the cache
    pub first_layer: u32,
    /// Number of layers covered
    pub num_layers: usize,
    /// Width of each cached row
    pub dim: usize,
    /// Maximum sequence length to cache
    pub max_seq_len: usize,
}

/// Key-Value cache for a single layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerKvCache {
    /// Cached keys, row-major [seq_len, dim]
    pub keys: Vec<f32>,
    /// Cached values, row-major [seq_len, dim]
    pub values: Vec<f32>,
    /// Current sequence length in cache
    pub seq_len: usize,
}

impl LayerKvCache {
    /// Append `rows` positions of keys and values
    pub fn append(&mut self, keys: &[f32], values: &[f32], rows: usize, dim: usize) -> Result<()> {
        if keys.len() != rows * dim || values.len() != rows * dim {
            return Err(EngineError::InferenceStep(format!(
                "KV cache update shape mismatch: keys {} / values {} for {}x{}",
                keys.len(),
                values.len(),
                rows,
                dim
            )));
        }
        self.keys.extend_from_slice(keys);
        self.values.extend_from_slice(values);
        self.seq_len += rows;
        Ok(())
    }

    /// Cached value row at `pos`
    pub fn value(&self, pos: usize, dim: usize) -> &[f32] {
        &self.values[pos * dim..(pos + 1) * dim]
    }

    /// Get memory usage in bytes
    pub fn memory_usage(&self) -> usize {
        (self.keys.len() + self.values.len()) * std::mem::size_of::<f32>()
    }
}

/// KV cache for all layers of a shard, owned by one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvCache {
    /// Per-layer caches, indexed relative to `config.first_layer`
    pub layers: Vec<LayerKvCache>,
    /// Configuration
    pub config: KvCacheConfig,
}

impl KvCache {
    /// Create a new, empty KV cache
    pub fn new(config: KvCacheConfig) -> Self {
        let layers = (0..config.num_layers)
            .map(|_| LayerKvCache::default())
            .collect();
        Self { layers, config }
    }

    /// Get mutable cache for an absolute layer index
    pub fn layer_mut(&mut self, layer: u32) -> Result<&mut LayerKvCache> {
        let first = self.config.first_layer;
        let num_layers = self.layers.len();
        layer
            .checked_sub(first)
            .and_then(|idx| self.layers.get_mut(idx as usize))
            .ok_or_else(|| {
                EngineError::InferenceStep(format!(
                    "Layer {} is outside cached range [{}, {})",
                    layer,
                    first,
                    first as usize + num_layers
                ))
            })
    }

    /// Fail if appending `new_tokens` positions would exceed `max_seq_len`
    pub fn reserve(&self, new_tokens: usize) -> Result<()> {
        let needed = self.seq_len() + new_tokens;
        if needed > self.config.max_seq_len {
            return Err(EngineError::InferenceStep(format!(
                "KV cache overflow: need {} positions but capacity is {}",
                needed, self.config.max_seq_len
            )));
        }
        Ok(())
    }

    /// Get the current sequence length
    pub fn seq_len(&self) -> usize {
        self.layers.first().map(|l| l.seq_len).unwrap_or(0)
    }

    /// Get total memory usage in bytes
    pub fn memory_usage(&self) -> usize {
        self.layers.iter().map(|l| l.memory_usage()).sum()
    }
}
