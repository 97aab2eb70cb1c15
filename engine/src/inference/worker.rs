//! Single-capacity shard worker
//!
//! Every heavy or state-mutating unit (loading, encoding, stepping) runs on
//! one dedicated OS thread that owns the model slot. Units are handed over
//! through a bounded channel of capacity 1 and answered through a oneshot,
//! so they execute strictly one at a time in submission order.
//!
//! ```text
//!  async callers            capacity-1 channel          worker thread
//!  submit(unit) ──────────► [ unit ] ──────────────────► unit(&mut slot)
//!       ▲                                                     │
//!       └──────────────────────── oneshot reply ◄─────────────┘
//! ```
//!
//! Once a unit has been handed over it runs to completion even if the
//! submitting future is dropped.

use crate::errors::{EngineError, Result, ShardError, WorkerError};
use crate::model::loader::{ModelArtifact, ModelLoader, Tokenizer};
use crate::model::shard::Shard;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::input::ImageInput;
use super::stateful::StatefulShardModel;
use super::tensor::{is_end_of_sequence, Tensor};

/// Units queued ahead of the one running
pub const WORKER_QUEUE_CAPACITY: usize = 1;

type Unit = Box<dyn FnOnce(&mut ModelSlot) + Send>;

/// Tokenizer and stateful model of the resident shard
pub struct ResidentModel {
    tokenizer: Box<dyn Tokenizer>,
    model: StatefulShardModel,
}

/// Output of one step as seen on the worker
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// Raw output tensor
    pub tensor: Tensor,
    /// Whether the output is the end-of-sequence token
    pub is_done: bool,
}

/// Token ids (and pixel values for multimodal prompts) ready to step
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPrompt {
    /// `[1, seq]` token ids
    pub input_ids: Tensor,
    /// Pixel values, present only when an image was supplied
    pub pixel_values: Option<Tensor>,
}

impl ResidentModel {
    /// Shard this model was loaded for
    pub fn shard(&self) -> &Shard {
        self.model.shard()
    }

    /// End-of-sequence id of the resident tokenizer
    pub fn eos_token_id(&self) -> u32 {
        self.tokenizer.eos_token_id()
    }

    /// Encode a prompt, with or without an image
    pub fn encode(&mut self, prompt: &str, image: Option<&ImageInput>) -> Result<EncodedPrompt> {
        match image {
            Some(image) => {
                let (input_ids, pixel_values) = self.tokenizer.encode_with_image(prompt, image)?;
                Ok(EncodedPrompt {
                    input_ids,
                    pixel_values: Some(pixel_values),
                })
            }
            None => Ok(EncodedPrompt {
                input_ids: self.tokenizer.encode(prompt)?,
                pixel_values: None,
            }),
        }
    }

    /// Step `request_id` and classify the output
    pub fn step(
        &mut self,
        request_id: &str,
        input: &Tensor,
        pixel_values: Option<&Tensor>,
    ) -> Result<StepOutput> {
        let tensor = self.model.step(request_id, input, pixel_values)?;
        let is_done = is_end_of_sequence(&tensor, self.tokenizer.eos_token_id());
        Ok(StepOutput { tensor, is_done })
    }

    /// Stateful model, for inspection
    pub fn model(&self) -> &StatefulShardModel {
        &self.model
    }

    /// Stateful model, for request bookkeeping
    pub fn model_mut(&mut self) -> &mut StatefulShardModel {
        &mut self.model
    }
}

/// The single model slot owned by the worker thread
#[derive(Default)]
pub struct ModelSlot {
    resident: Option<ResidentModel>,
}

impl ModelSlot {
    /// Shard currently installed, if any
    pub fn shard(&self) -> Option<&Shard> {
        self.resident.as_ref().map(|r| r.shard())
    }

    /// The resident model, but only if it was loaded for `shard`
    pub fn resident_for(&mut self, shard: &Shard) -> Option<&mut ResidentModel> {
        self.resident.as_mut().filter(|r| r.shard() == shard)
    }

    /// Load `shard` from `artifact` and replace the resident model
    ///
    /// The previous model stays installed until the new one is fully built,
    /// so a failed load leaves the slot untouched.
    pub fn install(
        &mut self,
        loader: &dyn ModelLoader,
        artifact: &ModelArtifact,
        shard: Shard,
    ) -> std::result::Result<(), ShardError> {
        let loaded = loader.load(artifact, &shard)?;
        let model = StatefulShardModel::new(shard, loaded.weights);

        let previous = self.resident.replace(ResidentModel {
            tokenizer: loaded.tokenizer,
            model,
        });
        if let Some(previous) = previous {
            debug!(shard = %previous.shard(), "Dropping previous shard");
        }
        Ok(())
    }
}

/// Handle to the worker thread
pub struct ShardWorker {
    tx: mpsc::Sender<Unit>,
}

impl ShardWorker {
    /// Spawn the worker thread with an empty slot
    pub fn spawn(thread_name: &str) -> std::result::Result<Self, WorkerError> {
        let (tx, mut rx) = mpsc::channel::<Unit>(WORKER_QUEUE_CAPACITY);

        std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let mut slot = ModelSlot::default();
                while let Some(unit) = rx.blocking_recv() {
                    unit(&mut slot);
                }
                debug!("Worker channel closed, thread exiting");
            })
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;

        info!(thread = %thread_name, "Shard worker started");
        Ok(Self { tx })
    }

    /// Run `unit` on the worker and wait for its result
    ///
    /// A panic inside the unit is caught and reported as
    /// [`WorkerError::Panicked`]; the worker keeps serving later units.
    pub async fn submit<R, F>(&self, unit: F) -> std::result::Result<R, WorkerError>
    where
        F: FnOnce(&mut ModelSlot) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let boxed: Unit = Box::new(move |slot: &mut ModelSlot| {
            let outcome = catch_unwind(AssertUnwindSafe(|| unit(slot)))
                .map_err(|payload| WorkerError::Panicked(panic_message(payload.as_ref())));
            if let Err(WorkerError::Panicked(msg)) = &outcome {
                error!(panic = %msg, "Worker unit panicked");
            }
            // Receiver is gone when the caller stopped waiting
            let _ = reply_tx.send(outcome);
        });

        self.tx.send(boxed).await.map_err(|_| WorkerError::Closed)?;
        reply_rx.await.map_err(|_| WorkerError::Closed)?
    }
}

/// Result of a unit that needs a particular shard
pub(crate) enum Pinned<R> {
    /// The shard was resident and the unit ran
    Ran(R),
    /// Another shard had been installed when the unit reached the worker
    Displaced,
}

impl ShardWorker {
    /// Run `unit` against the resident model if it was loaded for `shard`
    pub(crate) async fn submit_pinned<R, F>(
        &self,
        shard: Shard,
        unit: F,
    ) -> std::result::Result<Pinned<Result<R>>, EngineError>
    where
        F: FnOnce(&mut ResidentModel) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let outcome = self
            .submit(move |slot| match slot.resident_for(&shard) {
                Some(resident) => Pinned::Ran(unit(resident)),
                None => Pinned::Displaced,
            })
            .await?;
        Ok(outcome)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
