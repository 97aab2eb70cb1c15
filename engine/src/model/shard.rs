//! Shard identity
//!
//! A shard is a contiguous, half-open layer range `[start_layer, end_layer)`
//! of a model with `total_layers` layers. Two shards are the same shard iff
//! every field matches; the engine uses that equality to decide between
//! reusing the resident model and loading a new one.

use crate::errors::ShardError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One slice of a model's layers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shard {
    /// Model identifier (e.g., "llama-3-8b")
    pub model_id: String,

    /// First layer owned by this shard (inclusive)
    pub start_layer: u32,

    /// Last layer owned by this shard (exclusive)
    pub end_layer: u32,

    /// Number of layers in the whole model
    pub total_layers: u32,
}

impl Shard {
    /// Create a new shard
    pub fn new(
        model_id: impl Into<String>,
        start_layer: u32,
        end_layer: u32,
        total_layers: u32,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            start_layer,
            end_layer,
            total_layers,
        }
    }

    /// Shard covering every layer of the model
    pub fn full(model_id: impl Into<String>, total_layers: u32) -> Self {
        Self::new(model_id, 0, total_layers, total_layers)
    }

    /// Check that the layer range is non-empty and inside the model
    pub fn validate(&self) -> Result<(), ShardError> {
        if self.start_layer >= self.end_layer {
            return Err(ShardError::Load(format!(
                "empty layer range [{}, {}) for model {}",
                self.start_layer, self.end_layer, self.model_id
            )));
        }
        if self.end_layer > self.total_layers {
            return Err(ShardError::Load(format!(
                "layer range [{}, {}) exceeds {} total layers of model {}",
                self.start_layer, self.end_layer, self.total_layers, self.model_id
            )));
        }
        Ok(())
    }

    /// Whether this shard owns the embedding (first) layer
    pub fn is_first_layer(&self) -> bool {
        self.start_layer == 0
    }

    /// Whether this shard owns the output (last) layer
    pub fn is_last_layer(&self) -> bool {
        self.end_layer == self.total_layers
    }

    /// Number of layers in this shard
    pub fn layer_count(&self) -> u32 {
        self.end_layer.saturating_sub(self.start_layer)
    }

    /// Check if a layer is in this shard
    pub fn contains_layer(&self, layer: u32) -> bool {
        layer >= self.start_layer && layer < self.end_layer
    }

    /// Iterate over the absolute layer indices owned by this shard
    pub fn layers(&self) -> std::ops::Range<u32> {
        self.start_layer..self.end_layer
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}..{}/{}]",
            self.model_id, self.start_layer, self.end_layer, self.total_layers
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_equality_decides_reuse() {
        let a = Shard::new("m", 0, 4, 8);
        let b = Shard::new("m", 0, 4, 8);
        let c = Shard::new("m", 4, 8, 8);
        let d = Shard::new("other", 0, 4, 8);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_layer_helpers() {
        let shard = Shard::new("m", 0, 4, 8);
        assert!(shard.is_first_layer());
        assert!(!shard.is_last_layer());
        assert_eq!(shard.layer_count(), 4);
        assert!(shard.contains_layer(0));
        assert!(shard.contains_layer(3));
        assert!(!shard.contains_layer(4));
        assert_eq!(shard.layers().collect::<Vec<_>>(), vec![0, 1, 2, 3]);

        let tail = Shard::new("m", 4, 8, 8);
        assert!(!tail.is_first_layer());
        assert!(tail.is_last_layer());

        let full = Shard::full("m", 8);
        assert!(full.is_first_layer() && full.is_last_layer());
    }

    #[test]
    fn test_validate() {
        assert!(Shard::new("m", 0, 4, 8).validate().is_ok());
        assert!(matches!(
            Shard::new("m", 4, 4, 8).validate(),
            Err(ShardError::Load(_))
        ));
        assert!(matches!(
            Shard::new("m", 6, 10, 8).validate(),
            Err(ShardError::Load(_))
        ));
    }

    #[test]
    fn test_display_and_json() {
        let shard = Shard::new("m", 0, 4, 8);
        assert_eq!(shard.to_string(), "m[0..4/8]");

        let json = serde_json::to_string(&shard).unwrap();
        let parsed: Shard = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, shard);
    }
}
