//! Stateful shard model
//!
//! Wraps a shard's weights together with the generation state of every
//! request that has stepped through them. State is created on a request's
//! first step and kept for later steps with the same id, so repeated calls
//! continue one decoding sequence.

use crate::errors::Result;
use crate::model::loader::ShardForward;
use crate::model::shard::Shard;
use std::collections::HashMap;
use tracing::debug;

use super::kv_cache::KvCache;
use super::tensor::Tensor;

/// Weights of one shard plus per-request caches
pub struct StatefulShardModel {
    shard: Shard,
    weights: Box<dyn ShardForward>,
    caches: HashMap<String, KvCache>,
}

impl StatefulShardModel {
    /// Wrap loaded weights for `shard`
    pub fn new(shard: Shard, weights: Box<dyn ShardForward>) -> Self {
        Self {
            shard,
            weights,
            caches: HashMap::new(),
        }
    }

    /// Shard these weights belong to
    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    /// Run one step for `request_id`
    ///
    /// Not idempotent: the request's cache is extended by every successful
    /// call. An unseen request id starts from an empty cache.
    pub fn step(
        &mut self,
        request_id: &str,
        input: &Tensor,
        pixel_values: Option<&Tensor>,
    ) -> Result<Tensor> {
        let weights = &mut self.weights;
        let cache = self
            .caches
            .entry(request_id.to_string())
            .or_insert_with(|| {
                debug!(request_id = %request_id, "Initializing request state");
                KvCache::new(weights.cache_config())
            });

        weights.forward(input, pixel_values, cache)
    }

    /// Number of requests holding state
    pub fn active_requests(&self) -> usize {
        self.caches.len()
    }

    /// Cached sequence length for a request (0 if unseen)
    pub fn request_seq_len(&self, request_id: &str) -> usize {
        self.caches.get(request_id).map(|c| c.seq_len()).unwrap_or(0)
    }

    /// Drop the state of a finished request
    pub fn release(&mut self, request_id: &str) -> bool {
        self.caches.remove(request_id).is_some()
    }

    /// Total memory held by weights and caches
    pub fn memory_usage(&self) -> usize {
        self.weights.memory_usage() + self.caches.values().map(|c| c.memory_usage()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::kv_cache::KvCacheConfig;

    /// Emits how many positions the request had cached before this step
    struct Counting;

    impl ShardForward for Counting {
        fn cache_config(&self) -> KvCacheConfig {
            KvCacheConfig {
                first_layer: 0,
                num_layers: 1,
                dim: 1,
                max_seq_len: 16,
            }
        }

        fn forward(
            &mut self,
            input: &Tensor,
            _pixel_values: Option<&Tensor>,
            cache: &mut KvCache,
        ) -> Result<Tensor> {
            let before = cache.seq_len();
            cache.reserve(input.len())?;
            cache
                .layer_mut(0)?
                .append(&input.data, &input.data, input.len(), 1)?;
            Ok(Tensor::scalar(before as f32))
        }
    }

    #[test]
    fn test_state_persists_per_request() {
        let mut model = StatefulShardModel::new(Shard::new("m", 0, 1, 1), Box::new(Counting));
        let input = Tensor::from_token_ids(&[1, 2, 3]);

        assert_eq!(model.step("a", &input, None).unwrap().item(), Some(0.0));
        assert_eq!(model.step("a", &input, None).unwrap().item(), Some(3.0));
        assert_eq!(model.step("b", &input, None).unwrap().item(), Some(0.0));

        assert_eq!(model.active_requests(), 2);
        assert_eq!(model.request_seq_len("a"), 6);
        assert_eq!(model.request_seq_len("b"), 3);
        assert_eq!(model.request_seq_len("c"), 0);
    }

    #[test]
    fn test_release_forgets_state() {
        let mut model = StatefulShardModel::new(Shard::new("m", 0, 1, 1), Box::new(Counting));
        let input = Tensor::from_token_ids(&[1]);

        model.step("a", &input, None).unwrap();
        assert!(model.release("a"));
        assert!(!model.release("a"));
        assert_eq!(model.step("a", &input, None).unwrap().item(), Some(0.0));
    }

    #[test]
    fn test_step_errors_surface() {
        let mut model = StatefulShardModel::new(Shard::new("m", 0, 1, 1), Box::new(Counting));
        let too_long = Tensor::from_token_ids(&[0; 17]);
        assert!(model.step("a", &too_long, None).is_err());
    }
}
