use thiserror::Error;

/// Errors raised by the single-capacity worker itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    /// The worker thread has stopped and no longer accepts units
    #[error("Worker is closed")]
    Closed,

    /// A submitted unit panicked while running on the worker
    #[error("Worker unit panicked: {0}")]
    Panicked(String),
}

/// Errors that can occur while making a shard resident.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    /// Resolver, download or cache failure
    #[error("Shard resolution failed: {0}")]
    Resolution(String),

    /// Weight/tokenizer construction failure or incompatible shard boundaries
    #[error("Shard load failed: {0}")]
    Load(String),

    /// The load unit never ran to completion on the worker
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Errors that can occur in the inference engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The requested shard could not be made resident
    #[error(transparent)]
    Shard(#[from] ShardError),

    /// Malformed prompt or image input
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Runtime failure during the forward pass (shape mismatch, cache exhaustion, ...)
    #[error("Inference step failed: {0}")]
    InferenceStep(String),

    /// The worker failed to run a unit
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Other shard transitions kept displacing the requested shard
    #[error("Shard {shard} was displaced {attempts} times before its unit could run")]
    ShardDisplaced { shard: String, attempts: u32 },

    /// IO error occurred (config files, artifacts)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<toml::ser::Error> for EngineError {
    fn from(e: toml::ser::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::Encoding("image payload is empty".to_string());
        assert_eq!(err.to_string(), "Encoding error: image payload is empty");

        let err = ShardError::Resolution("no such model".to_string());
        assert_eq!(err.to_string(), "Shard resolution failed: no such model");
    }

    #[test]
    fn test_shard_error_is_transparent() {
        let err: EngineError = ShardError::Load("bad boundaries".to_string()).into();
        assert_eq!(err.to_string(), "Shard load failed: bad boundaries");
        assert!(matches!(err, EngineError::Shard(ShardError::Load(_))));
    }

    #[test]
    fn test_worker_error_conversion() {
        let err: ShardError = WorkerError::Closed.into();
        assert_eq!(err, ShardError::Worker(WorkerError::Closed));

        let err: EngineError = WorkerError::Panicked("boom".to_string()).into();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let engine_err: EngineError = io_err.into();
        assert!(engine_err.to_string().contains("IO error"));
    }
}
