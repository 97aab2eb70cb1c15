//! Stateful sharded inference
//!
//! ```text
//! InferenceEngine (async, any task)
//!       │  ensure_shard / dispatch
//!       ▼
//! ShardWorker (one OS thread, queue of one)
//!       │  owns
//!       ▼
//! ModelSlot ── ResidentModel ── Tokenizer
//!                            └─ StatefulShardModel ── KvCache per request
//! ```
//!
//! - [`engine`]: shard transitions and the two inference entry points
//! - [`worker`]: the single-capacity executor and the model slot it owns
//! - [`stateful`]: per-request caches around a shard's forward pass
//! - [`kv_cache`]: per-layer key/value storage
//! - [`input`]: prompt and image inputs
//! - [`tensor`]: the tensor passed between shards
//! - [`stats`]: engine counters

pub mod engine;
pub mod input;
pub mod kv_cache;
pub mod stateful;
pub mod stats;
pub mod tensor;
pub mod worker;

pub use engine::{InferenceEngine, InferenceOutput};
pub use input::{ImageInput, PromptInput};
pub use kv_cache::{KvCache, KvCacheConfig, LayerKvCache};
pub use stateful::StatefulShardModel;
pub use stats::EngineStats;
pub use tensor::{is_end_of_sequence, Tensor};
pub use worker::{EncodedPrompt, ModelSlot, ResidentModel, ShardWorker, StepOutput, WORKER_QUEUE_CAPACITY};
