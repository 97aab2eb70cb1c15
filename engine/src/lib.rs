//! Stateful inference over one shard of a layered model
//!
//! A process serves a contiguous range of a model's layers. The
//! [`InferenceEngine`] keeps exactly one shard resident on a dedicated
//! worker thread, swaps it when a request names a different shard, and
//! keeps per-request generation state so successive calls continue a
//! sequence.

pub mod config;
pub mod errors;
pub mod inference;
pub mod model;
pub mod observability;
pub mod reference;

pub use config::EngineConfig;
pub use errors::{EngineError, Result, ShardError, WorkerError};
pub use inference::{
    EngineStats, ImageInput, InferenceEngine, InferenceOutput, PromptInput, Tensor,
};
pub use model::{LoadedModel, ModelArtifact, ModelLoader, Shard, ShardForward, ShardResolver, Tokenizer};
pub use observability::{init_production_logging, init_simple_logging};
pub use reference::{LocalShardResolver, ReferenceLoader, ReferenceModelConfig};
