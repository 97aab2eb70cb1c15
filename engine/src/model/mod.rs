//! Shard identity and the collaborators that make a shard resident
//!
//! A [`Shard`] names a model and the half-open layer range `[start, end)`
//! of it that this process serves. Everything model-specific (finding the
//! artifact, tokenizing, running layers) is supplied through the traits in
//! [`loader`].

pub mod loader;
pub mod shard;

pub use loader::{LoadedModel, ModelArtifact, ModelLoader, ShardForward, ShardResolver, Tokenizer};
pub use shard::Shard;
