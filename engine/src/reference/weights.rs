//! Deterministic reference weights
//!
//! Weights are generated from the model seed, one stream per layer, so a
//! layer has the same weights whichever shard it is loaded into. Only the
//! layers of the shard are generated; the embedding table exists only for a
//! first-layer shard and the output head only for a last-layer shard.
//!
//! Each layer mixes every position with the running mean of all positions
//! the request has seen so far (its cached rows plus the current prefix),
//! then applies `tanh(W x)`. That makes the output depend on the request's
//! history, as attention over a KV cache does.

use crate::errors::{EngineError, Result};
use crate::inference::kv_cache::{KvCache, KvCacheConfig};
use crate::inference::tensor::Tensor;
use crate::model::loader::ShardForward;
use crate::model::shard::Shard;

use super::config::ReferenceModelConfig;

const EMBEDDING_SALT: u64 = 0x9E37_79B9_7F4A_7C15;
const HEAD_SALT: u64 = 0xC2B2_AE3D_27D4_EB4F;
const LAYER_STRIDE: u64 = 0x1656_67B1_9E37_79F9;

/// Linear congruential generator for reproducible weights
///
/// Constants from Numerical Recipes.
#[derive(Debug, Clone)]
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        const A: u64 = 6364136223846793005;
        const C: u64 = 1442695040888963407;

        self.state = self.state.wrapping_mul(A).wrapping_add(C);
        self.state
    }

    /// Uniform in [-1.0, 1.0)
    fn next_f32(&mut self) -> f32 {
        let mantissa = (self.next_u64() >> 40) & 0xFF_FFFF;
        (mantissa as f32) / (1 << 23) as f32 - 1.0
    }

    /// Xavier/Glorot uniform sample
    fn xavier_uniform(&mut self, fan_in: usize, fan_out: usize) -> f32 {
        let limit = (6.0_f32 / (fan_in + fan_out) as f32).sqrt();
        self.next_f32() * limit
    }

    fn uniform_vec(&mut self, len: usize) -> Vec<f32> {
        (0..len).map(|_| self.next_f32()).collect()
    }

    fn xavier_matrix(&mut self, rows: usize, cols: usize) -> Vec<f32> {
        (0..rows * cols)
            .map(|_| self.xavier_uniform(rows, cols))
            .collect()
    }
}

/// Weights of one layer, row-major [hidden, hidden]
#[derive(Debug, Clone)]
struct LayerWeights {
    index: u32,
    w: Vec<f32>,
}

/// Reference forward pass over a shard's layers
#[derive(Debug, Clone)]
pub struct ReferenceWeights {
    shard: Shard,
    hidden_dim: usize,
    vocab_size: usize,
    max_seq_len: usize,
    /// [vocab, hidden], first-layer shards only
    embedding: Option<Vec<f32>>,
    layers: Vec<LayerWeights>,
    /// [hidden, vocab], last-layer shards only
    lm_head: Option<Vec<f32>>,
}

impl ReferenceWeights {
    /// Generate weights for the layers of `shard`
    pub fn generate(config: &ReferenceModelConfig, shard: &Shard) -> Self {
        let hidden = config.hidden_dim;

        let embedding = shard.is_first_layer().then(|| {
            Rng::new(config.seed ^ EMBEDDING_SALT).uniform_vec(config.vocab_size * hidden)
        });

        let layers = shard
            .layers()
            .map(|index| {
                let seed = config
                    .seed
                    .wrapping_add((index as u64 + 1).wrapping_mul(LAYER_STRIDE));
                LayerWeights {
                    index,
                    w: Rng::new(seed).xavier_matrix(hidden, hidden),
                }
            })
            .collect();

        let lm_head = shard.is_last_layer().then(|| {
            Rng::new(config.seed ^ HEAD_SALT).xavier_matrix(hidden, config.vocab_size)
        });

        Self {
            shard: shard.clone(),
            hidden_dim: hidden,
            vocab_size: config.vocab_size,
            max_seq_len: config.max_seq_len,
            embedding,
            layers,
            lm_head,
        }
    }

    /// Embed a `[1, seq]` token id tensor into hidden states
    fn embed(&self, embedding: &[f32], input: &Tensor) -> Result<Vec<f32>> {
        if input.ndim() != 2 || input.shape[0] != 1 {
            return Err(EngineError::InferenceStep(format!(
                "first-layer shard expects token ids of shape [1, seq], got {:?}",
                input.shape
            )));
        }

        let hidden = self.hidden_dim;
        let mut states = Vec::with_capacity(input.len() * hidden);
        for &value in &input.data {
            if value.fract() != 0.0 || value < 0.0 || value >= self.vocab_size as f32 {
                return Err(EngineError::InferenceStep(format!(
                    "token id {} is not an id in a vocabulary of {}",
                    value, self.vocab_size
                )));
            }
            let id = value as usize;
            states.extend_from_slice(&embedding[id * hidden..(id + 1) * hidden]);
        }
        Ok(states)
    }

    /// Accept `[1, seq, hidden]` activations from the previous shard
    fn accept_hidden(&self, input: &Tensor) -> Result<Vec<f32>> {
        if input.ndim() != 3 || input.shape[0] != 1 || input.shape[2] != self.hidden_dim {
            return Err(EngineError::InferenceStep(format!(
                "shard {} expects hidden states of shape [1, seq, {}], got {:?}",
                self.shard, self.hidden_dim, input.shape
            )));
        }
        Ok(input.data.clone())
    }

    fn apply_layer(
        &self,
        layer: &LayerWeights,
        states: &[f32],
        seq: usize,
        cache: &mut KvCache,
    ) -> Result<Vec<f32>> {
        let hidden = self.hidden_dim;
        let layer_cache = cache.layer_mut(layer.index)?;

        // Running sum over cached rows, then extended by each current row
        let past = layer_cache.seq_len;
        let mut running = vec![0.0_f32; hidden];
        for pos in 0..past {
            for (acc, v) in running.iter_mut().zip(layer_cache.value(pos, hidden)) {
                *acc += v;
            }
        }

        let mut out = Vec::with_capacity(seq * hidden);
        let mut mixed = vec![0.0_f32; hidden];
        for t in 0..seq {
            let row = &states[t * hidden..(t + 1) * hidden];
            for (acc, v) in running.iter_mut().zip(row) {
                *acc += v;
            }
            let count = (past + t + 1) as f32;
            for ((m, x), acc) in mixed.iter_mut().zip(row).zip(&running) {
                *m = x + acc / count;
            }
            for j in 0..hidden {
                let dot: f32 = mixed
                    .iter()
                    .enumerate()
                    .map(|(i, x)| x * layer.w[i * hidden + j])
                    .sum();
                out.push(dot.tanh());
            }
        }

        layer_cache.append(states, states, seq, hidden)?;
        Ok(out)
    }

    /// Argmax token of the last position
    fn sample_last(&self, lm_head: &[f32], states: &[f32], seq: usize) -> Tensor {
        let hidden = self.hidden_dim;
        let last = &states[(seq - 1) * hidden..seq * hidden];

        let mut best = (0usize, f32::NEG_INFINITY);
        for v in 0..self.vocab_size {
            let logit: f32 = last
                .iter()
                .enumerate()
                .map(|(i, x)| x * lm_head[i * self.vocab_size + v])
                .sum();
            if logit > best.1 {
                best = (v, logit);
            }
        }
        Tensor::scalar(best.0 as f32)
    }
}

impl ShardForward for ReferenceWeights {
    fn cache_config(&self) -> KvCacheConfig {
        KvCacheConfig {
            first_layer: self.shard.start_layer,
            num_layers: self.layers.len(),
            dim: self.hidden_dim,
            max_seq_len: self.max_seq_len,
        }
    }

    fn forward(
        &mut self,
        input: &Tensor,
        pixel_values: Option<&Tensor>,
        cache: &mut KvCache,
    ) -> Result<Tensor> {
        let mut states = match (&self.embedding, pixel_values) {
            (Some(embedding), pixels) => {
                let mut states = self.embed(embedding, input)?;
                if let Some(pixels) = pixels {
                    let shift = pixels.mean();
                    states.iter_mut().for_each(|x| *x += shift);
                }
                states
            }
            (None, Some(_)) => {
                return Err(EngineError::InferenceStep(format!(
                    "shard {} does not own the first layer and cannot take pixel values",
                    self.shard
                )));
            }
            (None, None) => self.accept_hidden(input)?,
        };

        let seq = states.len() / self.hidden_dim;
        if seq == 0 {
            return Err(EngineError::InferenceStep("input has no positions".to_string()));
        }
        cache.reserve(seq)?;

        for layer in &self.layers {
            states = self.apply_layer(layer, &states, seq, cache)?;
        }

        match &self.lm_head {
            Some(lm_head) => Ok(self.sample_last(lm_head, &states, seq)),
            None => Tensor::new(states, vec![1, seq, self.hidden_dim]),
        }
    }

    fn memory_usage(&self) -> usize {
        let floats = self.embedding.as_ref().map_or(0, Vec::len)
            + self.layers.iter().map(|l| l.w.len()).sum::<usize>()
            + self.lm_head.as_ref().map_or(0, Vec::len);
        floats * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> ReferenceModelConfig {
        ReferenceModelConfig {
            hidden_dim: 8,
            vocab_size: 300,
            num_layers: 4,
            eos_token_id: 2,
            seed: 42,
            max_seq_len: 32,
        }
    }

    fn tokens(ids: &[u32]) -> Tensor {
        Tensor::from_token_ids(ids)
    }

    #[test]
    fn test_rng_is_deterministic() {
        let mut a = Rng::new(12345);
        let mut b = Rng::new(12345);
        for _ in 0..100 {
            let x = a.next_f32();
            assert_eq!(x, b.next_f32());
            assert!((-1.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_only_shard_parts_are_generated() {
        let config = tiny_config();
        let head = ReferenceWeights::generate(&config, &Shard::new("m", 0, 2, 4));
        assert!(head.embedding.is_some());
        assert!(head.lm_head.is_none());
        assert_eq!(head.layers.len(), 2);

        let tail = ReferenceWeights::generate(&config, &Shard::new("m", 2, 4, 4));
        assert!(tail.embedding.is_none());
        assert!(tail.lm_head.is_some());
        assert_eq!(tail.layers[0].index, 2);
    }

    #[test]
    fn test_layer_weights_do_not_depend_on_split() {
        let config = tiny_config();
        let full = ReferenceWeights::generate(&config, &Shard::new("m", 0, 4, 4));
        let tail = ReferenceWeights::generate(&config, &Shard::new("m", 2, 4, 4));
        assert_eq!(full.layers[2].w, tail.layers[0].w);
    }

    #[test]
    fn test_partial_shard_outputs_hidden_states() {
        let config = tiny_config();
        let mut weights = ReferenceWeights::generate(&config, &Shard::new("m", 0, 2, 4));
        let mut cache = KvCache::new(weights.cache_config());

        let out = weights.forward(&tokens(&[1, 2, 3]), None, &mut cache).unwrap();
        assert_eq!(out.shape, vec![1, 3, 8]);
        assert!(out.data.iter().all(|x| x.abs() <= 1.0));
        assert_eq!(cache.seq_len(), 3);
    }

    #[test]
    fn test_split_shards_compose() {
        let config = tiny_config();
        let mut head = ReferenceWeights::generate(&config, &Shard::new("m", 0, 2, 4));
        let mut tail = ReferenceWeights::generate(&config, &Shard::new("m", 2, 4, 4));
        let mut full = ReferenceWeights::generate(&config, &Shard::new("m", 0, 4, 4));

        let mut head_cache = KvCache::new(head.cache_config());
        let mut tail_cache = KvCache::new(tail.cache_config());
        let mut full_cache = KvCache::new(full.cache_config());

        let input = tokens(&[1, 70, 80]);
        let hidden = head.forward(&input, None, &mut head_cache).unwrap();
        let split = tail.forward(&hidden, None, &mut tail_cache).unwrap();
        let whole = full.forward(&input, None, &mut full_cache).unwrap();

        assert_eq!(split.shape, vec![1]);
        assert_eq!(split, whole);
    }

    #[test]
    fn test_history_changes_output() {
        let config = tiny_config();
        let mut weights = ReferenceWeights::generate(&config, &Shard::new("m", 0, 2, 4));
        let mut cache = KvCache::new(weights.cache_config());
        let input = tokens(&[1, 2, 3]);

        let first = weights.forward(&input, None, &mut cache).unwrap();
        let second = weights.forward(&input, None, &mut cache).unwrap();
        assert_ne!(first, second);

        let mut fresh = KvCache::new(weights.cache_config());
        assert_eq!(weights.forward(&input, None, &mut fresh).unwrap(), first);
    }

    #[test]
    fn test_shape_mismatches_fail() {
        let config = tiny_config();
        let mut head = ReferenceWeights::generate(&config, &Shard::new("m", 0, 2, 4));
        let mut tail = ReferenceWeights::generate(&config, &Shard::new("m", 2, 4, 4));
        let mut head_cache = KvCache::new(head.cache_config());
        let mut tail_cache = KvCache::new(tail.cache_config());

        // Token ids must be [1, seq] integers inside the vocabulary
        let batch = Tensor::new(vec![1.0, 2.0], vec![2, 1]).unwrap();
        assert!(head.forward(&batch, None, &mut head_cache).is_err());
        let fractional = Tensor::new(vec![1.5], vec![1, 1]).unwrap();
        assert!(head.forward(&fractional, None, &mut head_cache).is_err());
        assert!(head.forward(&tokens(&[300]), None, &mut head_cache).is_err());

        // Hidden states must match the hidden dimension
        let wrong_width = Tensor::zeros(vec![1, 2, 7]);
        assert!(tail.forward(&wrong_width, None, &mut tail_cache).is_err());
        assert!(tail.forward(&tokens(&[1, 2]), None, &mut tail_cache).is_err());

        // Pixels only enter through the first layer
        let pixels = Tensor::zeros(vec![1, 4]);
        let hidden = Tensor::zeros(vec![1, 2, 8]);
        assert!(tail.forward(&hidden, Some(&pixels), &mut tail_cache).is_err());

        // Failed steps leave no state behind
        assert_eq!(head_cache.seq_len(), 0);
        assert_eq!(tail_cache.seq_len(), 0);
    }

    #[test]
    fn test_cache_overflow_is_step_error() {
        let config = ReferenceModelConfig {
            max_seq_len: 4,
            ..tiny_config()
        };
        let mut weights = ReferenceWeights::generate(&config, &Shard::new("m", 0, 1, 4));
        let mut cache = KvCache::new(weights.cache_config());

        weights.forward(&tokens(&[1, 2, 3]), None, &mut cache).unwrap();
        let err = weights.forward(&tokens(&[1, 2]), None, &mut cache).unwrap_err();
        assert!(err.to_string().contains("KV cache overflow"));
    }

    #[test]
    fn test_pixels_shift_embeddings() {
        let config = tiny_config();
        let mut weights = ReferenceWeights::generate(&config, &Shard::new("m", 0, 2, 4));
        let input = tokens(&[1, 2]);
        let pixels = Tensor::new(vec![0.5, 1.0], vec![1, 2]).unwrap();

        let mut plain_cache = KvCache::new(weights.cache_config());
        let mut image_cache = KvCache::new(weights.cache_config());
        let plain = weights.forward(&input, None, &mut plain_cache).unwrap();
        let with_image = weights.forward(&input, Some(&pixels), &mut image_cache).unwrap();
        assert_ne!(plain, with_image);
    }
}
