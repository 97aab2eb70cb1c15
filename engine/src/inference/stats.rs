//! Engine statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for shard transitions and inference steps
#[derive(Debug)]
pub struct EngineStats {
    /// Shards successfully made resident
    pub shard_loads: AtomicU64,

    /// Shard transitions that failed (resolution or load)
    pub shard_load_failures: AtomicU64,

    /// `ensure_shard` calls answered without any I/O
    pub fast_path_hits: AtomicU64,

    /// Units that found a different shard installed and had to re-pin
    pub displacements: AtomicU64,

    /// Successful steps
    pub steps_completed: AtomicU64,

    /// Failed steps
    pub steps_failed: AtomicU64,

    /// Prompts or images that could not be encoded
    pub encoding_failures: AtomicU64,

    /// Total time spent in steps, including queueing, in milliseconds
    pub total_step_time_ms: AtomicU64,

    /// Total time spent loading shards in milliseconds
    pub total_load_time_ms: AtomicU64,

    /// Start time for uptime tracking
    pub start_time: Instant,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineStats {
    /// Create new engine statistics tracker
    pub fn new() -> Self {
        Self {
            shard_loads: AtomicU64::new(0),
            shard_load_failures: AtomicU64::new(0),
            fast_path_hits: AtomicU64::new(0),
            displacements: AtomicU64::new(0),
            steps_completed: AtomicU64::new(0),
            steps_failed: AtomicU64::new(0),
            encoding_failures: AtomicU64::new(0),
            total_step_time_ms: AtomicU64::new(0),
            total_load_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a committed shard transition
    pub fn record_load(&self, load_time_ms: u64) {
        self.shard_loads.fetch_add(1, Ordering::Relaxed);
        self.total_load_time_ms
            .fetch_add(load_time_ms, Ordering::Relaxed);
    }

    /// Record a failed shard transition
    pub fn record_load_failure(&self) {
        self.shard_load_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an `ensure_shard` answered from the resident marker
    pub fn record_fast_path(&self) {
        self.fast_path_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a unit that found its shard displaced
    pub fn record_displacement(&self) {
        self.displacements.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful step
    pub fn record_step(&self, step_time_ms: u64) {
        self.steps_completed.fetch_add(1, Ordering::Relaxed);
        self.total_step_time_ms
            .fetch_add(step_time_ms, Ordering::Relaxed);
    }

    /// Record a failed step
    pub fn record_step_failure(&self) {
        self.steps_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a prompt or image that failed to encode
    pub fn record_encoding_failure(&self) {
        self.encoding_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of committed shard loads
    pub fn loads(&self) -> u64 {
        self.shard_loads.load(Ordering::Relaxed)
    }

    /// Number of successful steps
    pub fn steps(&self) -> u64 {
        self.steps_completed.load(Ordering::Relaxed)
    }

    /// Average step time (milliseconds)
    pub fn avg_step_time_ms(&self) -> f64 {
        let steps = self.steps();
        if steps == 0 {
            return 0.0;
        }
        self.total_step_time_ms.load(Ordering::Relaxed) as f64 / steps as f64
    }

    /// Uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Log a statistics summary
    pub fn print_summary(&self) {
        info!(
            uptime_secs = self.uptime_secs(),
            shard_loads = self.loads(),
            shard_load_failures = self.shard_load_failures.load(Ordering::Relaxed),
            fast_path_hits = self.fast_path_hits.load(Ordering::Relaxed),
            displacements = self.displacements.load(Ordering::Relaxed),
            steps = self.steps(),
            steps_failed = self.steps_failed.load(Ordering::Relaxed),
            encoding_failures = self.encoding_failures.load(Ordering::Relaxed),
            avg_step_time_ms = format!("{:.2}", self.avg_step_time_ms()),
            "Engine statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = EngineStats::new();
        stats.record_load(120);
        stats.record_load_failure();
        stats.record_fast_path();
        stats.record_fast_path();
        stats.record_step(10);
        stats.record_step(30);
        stats.record_step_failure();
        stats.record_encoding_failure();

        assert_eq!(stats.loads(), 1);
        assert_eq!(stats.shard_load_failures.load(Ordering::Relaxed), 1);
        assert_eq!(stats.fast_path_hits.load(Ordering::Relaxed), 2);
        assert_eq!(stats.steps(), 2);
        assert_eq!(stats.steps_failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.encoding_failures.load(Ordering::Relaxed), 1);
        assert!((stats.avg_step_time_ms() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_average() {
        assert_eq!(EngineStats::new().avg_step_time_ms(), 0.0);
    }
}
