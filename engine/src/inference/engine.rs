//! Sharded inference engine
//!
//! The engine owns one model slot (living on the [`ShardWorker`]) and makes
//! sure the right shard is in it before any computation:
//!
//! ```text
//! infer_prompt / infer_tensor
//!       │
//!       ▼
//! ensure_shard ──(fast path: already resident)──────────────┐
//!       │                                                    │
//!       ▼ transition guard                                   │
//! resolve (async I/O, off the worker)                        │
//!       │                                                    │
//!       ▼                                                    │
//! worker: load + construct + install + mark resident         │
//!       │                                                    │
//!       ▼                                                    │
//! worker: encode, step ◄─────────────────────────────────────┘
//! ```
//!
//! Shard transitions are serialized by a transition guard. The resident
//! marker is written by the install unit itself, right after the worker
//! has replaced the model, so it always names what the slot holds. Every
//! unit that touches the model names the shard it expects; a unit that
//! reaches the worker after a different shard was installed forces a fresh
//! transition to its own shard instead of running against the wrong weights.

use crate::config::EngineConfig;
use crate::errors::{EngineError, Result, ShardError};
use crate::model::loader::{ModelLoader, ShardResolver};
use crate::model::shard::Shard;
use ndarray::ArrayD;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::input::{ImageInput, PromptInput};
use super::stats::EngineStats;
use super::tensor::Tensor;
use super::worker::{EncodedPrompt, Pinned, ResidentModel, ShardWorker, StepOutput};

/// Result of one inference call
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    /// Output of the shard's last layer
    pub output: ArrayD<f32>,
    /// Opaque continuation state; reserved and currently always empty
    pub inference_state: String,
    /// Whether the output is the end-of-sequence token
    pub is_done: bool,
}

/// Stateful sharded inference engine
pub struct InferenceEngine {
    /// Maps shards to local artifacts
    resolver: Arc<dyn ShardResolver>,

    /// Builds tokenizer and weights on the worker
    loader: Arc<dyn ModelLoader>,

    /// Single-capacity executor owning the model slot
    worker: ShardWorker,

    /// Shard installed in the worker's slot; written only by the install unit
    resident: Arc<RwLock<Option<Shard>>>,

    /// Serializes shard transitions
    transition: Mutex<()>,

    /// Engine statistics
    stats: Arc<EngineStats>,

    /// Re-pin budget for displaced units
    max_repin_attempts: u32,
}

impl InferenceEngine {
    /// Create an engine with default settings
    pub fn new(resolver: Arc<dyn ShardResolver>, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        Self::with_config(resolver, loader, &EngineConfig::default())
    }

    /// Create an engine from configuration
    pub fn with_config(
        resolver: Arc<dyn ShardResolver>,
        loader: Arc<dyn ModelLoader>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let worker = ShardWorker::spawn(&config.worker_thread_name)?;

        Ok(Self {
            resolver,
            loader,
            worker,
            resident: Arc::new(RwLock::new(None)),
            transition: Mutex::new(()),
            stats: Arc::new(EngineStats::new()),
            max_repin_attempts: config.max_repin_attempts,
        })
    }

    /// Get reference to statistics
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// Shard currently resident, if any
    pub async fn resident_shard(&self) -> Option<Shard> {
        self.resident.read().await.clone()
    }

    async fn is_resident(&self, shard: &Shard) -> bool {
        self.resident.read().await.as_ref() == Some(shard)
    }

    /// Make `shard` the resident shard
    ///
    /// Returns immediately when it already is. Otherwise resolves the
    /// artifact, then loads and installs the model as one worker unit; the
    /// previous shard stays resident and usable until that unit succeeds,
    /// and stays resident if it fails.
    #[instrument(skip(self), fields(shard = %shard))]
    pub async fn ensure_shard(&self, shard: &Shard) -> std::result::Result<(), ShardError> {
        if self.is_resident(shard).await {
            self.stats.record_fast_path();
            return Ok(());
        }

        let _guard = self.transition.lock().await;

        // Another caller may have committed this shard while we waited
        if self.is_resident(shard).await {
            debug!("Shard became resident while waiting for transition");
            self.stats.record_fast_path();
            return Ok(());
        }

        self.transition_to(shard).await
    }

    /// Make `shard` resident again after a unit found it displaced
    ///
    /// Skips the marker fast path and asks the worker what its slot holds,
    /// so a marker that lags the slot cannot stall the caller.
    async fn repin(&self, shard: &Shard) -> std::result::Result<(), ShardError> {
        let _guard = self.transition.lock().await;

        let installed = self.worker.submit(|slot| slot.shard().cloned()).await?;
        if installed.as_ref() == Some(shard) {
            debug!(shard = %shard, "Shard already installed, refreshing marker");
            *self.resident.write().await = installed;
            return Ok(());
        }

        self.transition_to(shard).await
    }

    /// Resolve, load and install `shard`; callers hold the transition guard
    async fn transition_to(&self, shard: &Shard) -> std::result::Result<(), ShardError> {
        let start = Instant::now();
        let result = self.load_and_install(shard).await;
        match &result {
            Ok(()) => {
                let load_time_ms = start.elapsed().as_millis() as u64;
                self.stats.record_load(load_time_ms);
                info!(shard = %shard, load_time_ms = load_time_ms, "Shard resident");
            }
            Err(e) => {
                self.stats.record_load_failure();
                warn!(shard = %shard, error = %e, "Shard transition failed, keeping previous shard");
            }
        }
        result
    }

    async fn load_and_install(&self, shard: &Shard) -> std::result::Result<(), ShardError> {
        debug!("Resolving shard artifact");
        let artifact = self.resolver.resolve(shard).await?;
        debug!(artifact = %artifact.path().display(), "Loading shard on worker");

        let loader = Arc::clone(&self.loader);
        let marker = Arc::clone(&self.resident);
        let target = shard.clone();

        // Marker and slot change in the same unit; a dropped caller cannot split them
        self.worker
            .submit(move |slot| {
                slot.install(loader.as_ref(), &artifact, target.clone())?;
                *marker.blocking_write() = Some(target);
                Ok::<(), ShardError>(())
            })
            .await??;
        Ok(())
    }

    /// Run a prompt through the shard
    ///
    /// With an image, prompt and image are encoded jointly and the pixel
    /// values are passed to the step; without one, only token ids are.
    #[instrument(skip(self, input, inference_state), fields(shard = %shard, multimodal = matches!(input, PromptInput::TextWithImage { .. })))]
    pub async fn infer_prompt(
        &self,
        request_id: &str,
        shard: &Shard,
        input: PromptInput,
        inference_state: Option<String>,
    ) -> Result<InferenceOutput> {
        self.ensure_shard(shard).await?;
        note_inference_state(request_id, inference_state.as_deref());

        let (prompt, image) = match input {
            PromptInput::Text(prompt) => (prompt, None),
            PromptInput::TextWithImage { prompt, image } => {
                let image = ImageInput::from_data_uri(&image).inspect_err(|_| {
                    self.stats.record_encoding_failure();
                })?;
                (prompt, Some(image))
            }
        };

        let encoded: EncodedPrompt = self
            .dispatch(shard, move |resident| resident.encode(&prompt, image.as_ref()))
            .await
            .inspect_err(|e| {
                if matches!(e, EngineError::Encoding(_)) {
                    self.stats.record_encoding_failure();
                }
            })?;

        debug!(
            request_id = %request_id,
            tokens = encoded.input_ids.len(),
            has_pixels = encoded.pixel_values.is_some(),
            "Prompt encoded"
        );

        let output = self
            .run_step(request_id, shard, encoded.input_ids, encoded.pixel_values)
            .await?;
        finish(output)
    }

    /// Run an externally supplied tensor through the shard
    #[instrument(skip(self, input, inference_state), fields(shard = %shard, input_shape = ?input.shape()))]
    pub async fn infer_tensor(
        &self,
        request_id: &str,
        shard: &Shard,
        input: ArrayD<f32>,
        inference_state: Option<String>,
    ) -> Result<InferenceOutput> {
        self.ensure_shard(shard).await?;
        note_inference_state(request_id, inference_state.as_deref());

        let output = self
            .run_step(request_id, shard, Tensor::from(input), None)
            .await?;
        finish(output)
    }

    /// Forget the generation state of a request on the resident shard
    ///
    /// Returns false when the shard is not resident or the request is unknown.
    pub async fn release_request(&self, request_id: &str, shard: &Shard) -> Result<bool> {
        let request_id = request_id.to_string();
        let target = shard.clone();
        let released = self
            .worker
            .submit(move |slot| {
                slot.resident_for(&target)
                    .map(|resident| resident.model_mut().release(&request_id))
                    .unwrap_or(false)
            })
            .await?;
        Ok(released)
    }

    /// Step `request_id` on the worker and record the outcome
    async fn run_step(
        &self,
        request_id: &str,
        shard: &Shard,
        input: Tensor,
        pixel_values: Option<Tensor>,
    ) -> Result<StepOutput> {
        let start = Instant::now();
        let request_id = request_id.to_string();
        let result = self
            .dispatch(shard, move |resident| {
                resident.step(&request_id, &input, pixel_values.as_ref())
            })
            .await;

        match &result {
            Ok(_) => self.stats.record_step(start.elapsed().as_millis() as u64),
            Err(_) => self.stats.record_step_failure(),
        }
        result
    }

    /// Run `unit` against the resident model for `shard` on the worker
    ///
    /// If a concurrent transition installed another shard before the unit
    /// reached the worker, the shard is made resident again and the unit
    /// resubmitted, at most `max_repin_attempts` times.
    async fn dispatch<R, F>(&self, shard: &Shard, unit: F) -> Result<R>
    where
        F: FnOnce(&mut ResidentModel) -> Result<R> + Clone + Send + 'static,
        R: Send + 'static,
    {
        let mut attempt = 0;
        loop {
            match self.worker.submit_pinned(shard.clone(), unit.clone()).await? {
                Pinned::Ran(result) => return result,
                Pinned::Displaced => {
                    self.stats.record_displacement();
                    if attempt >= self.max_repin_attempts {
                        return Err(EngineError::ShardDisplaced {
                            shard: shard.to_string(),
                            attempts: attempt,
                        });
                    }
                    attempt += 1;
                    warn!(shard = %shard, attempt = attempt, "Shard displaced, re-pinning");
                    self.repin(shard).await?;
                }
            }
        }
    }
}

fn note_inference_state(request_id: &str, inference_state: Option<&str>) {
    if let Some(state) = inference_state {
        debug!(
            request_id = %request_id,
            state_len = state.len(),
            "Ignoring continuation state"
        );
    }
}

fn finish(output: StepOutput) -> Result<InferenceOutput> {
    Ok(InferenceOutput {
        output: output.tensor.into_array()?,
        inference_state: String::new(),
        is_done: output.is_done,
    })
}
