//! Local reference backend
//!
//! A self-contained model family used by the CLI and the integration tests:
//! artifacts are directories under a models directory, the tokenizer works on
//! bytes and the weights are generated deterministically from a seed. Any
//! real backend plugs into the engine through the same
//! [`ShardResolver`](crate::model::ShardResolver) and
//! [`ModelLoader`](crate::model::ModelLoader) traits.

pub mod config;
pub mod loader;
pub mod resolver;
pub mod tokenizer;
pub mod weights;

pub use config::{ReferenceModelConfig, CONFIG_FILE};
pub use loader::ReferenceLoader;
pub use resolver::LocalShardResolver;
pub use tokenizer::{ByteTokenizer, BOS_TOKEN_ID, EOS_TOKEN_ID};
pub use weights::ReferenceWeights;
