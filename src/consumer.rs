//! Queue side of the pipeline: chunks from the queue into the store.
//!
//! Every delivery goes through decode, one multi-row insert, then ack. When
//! any step fails the chunk is appended to the [`FailureLog`] and the message
//! is handed back to the broker for redelivery. A message is never acked
//! unless its rows were inserted.

use crate::backend::{Delivery, QueueClient, UserStore};
use crate::codec::ChunkCodec;
use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::failure_log::FailureLog;
use crate::model::{FailedInsertEntry, FailureStage, RawRow};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a single delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Inserted and acknowledged.
    Acked { rows: u64 },
    /// Logged and returned to the queue.
    Requeued { error: String },
    /// Logged and refused without requeue after too many attempts.
    DeadLettered { error: String },
}

pub struct IngestConsumer {
    queue: Arc<dyn QueueClient>,
    store: Arc<dyn UserStore>,
    failure_log: Arc<FailureLog>,
    codec: ChunkCodec,
    config: PipelineConfig,
}

impl IngestConsumer {
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] for an invalid configuration.
    pub fn new(
        queue: Arc<dyn QueueClient>,
        store: Arc<dyn UserStore>,
        failure_log: Arc<FailureLog>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            queue,
            store,
            failure_log,
            codec: ChunkCodec::default(),
            config,
        })
    }

    /// Decoding detects the compression of each payload, so this only
    /// matters for custom [`CompressionCodec`](crate::io::compression::CompressionCodec)s.
    #[must_use]
    pub fn with_codec(mut self, codec: ChunkCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Consume until `shutdown` fires or the broker ends the subscription.
    ///
    /// Up to `prefetch` deliveries are handled concurrently. Deliveries in
    /// flight when `shutdown` fires are finished before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be declared or subscribed to.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let queue = self.config.queue_name.as_str();
        self.queue.declare_queue(queue).await?;
        let deliveries = self.queue.subscribe(queue, self.config.prefetch).await?;
        info!(queue, prefetch = self.config.prefetch, "consumer started");

        deliveries
            .take_until(shutdown.cancelled())
            .for_each_concurrent(usize::from(self.config.prefetch), |delivery| async move {
                match delivery {
                    Ok(delivery) => {
                        if let Err(e) = self.handle_delivery(delivery).await {
                            error!(error = %e, "failed to settle delivery");
                        }
                    }
                    Err(e) => warn!(error = %e, "delivery stream error"),
                }
            })
            .await;

        info!(queue, "consumer stopped");
        Ok(())
    }

    /// Process and settle one delivery.
    ///
    /// # Errors
    ///
    /// Returns an error only if the broker could not be told the outcome;
    /// processing failures are reported through [`DeliveryOutcome`].
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<DeliveryOutcome> {
        let attempt = delivery.attempt();
        if delivery.redelivered() {
            debug!(attempt, "processing redelivered message");
        }

        let (rows, failure) = match self.codec.decode(delivery.payload()) {
            Ok(chunk) => {
                let records = chunk.to_records();
                match self.store.insert_users(&records).await {
                    Ok(inserted) => {
                        delivery.ack().await?;
                        debug!(rows = records.len(), inserted, "chunk inserted");
                        return Ok(DeliveryOutcome::Acked { rows: inserted });
                    }
                    Err(source) => {
                        let err = IngestError::Insert {
                            rows: records.len(),
                            source,
                        };
                        (chunk.into_rows(), Failure::new(FailureStage::Insert, &err, None))
                    }
                }
            }
            Err(err) => {
                let raw = match &err {
                    IngestError::MalformedMessage { raw, .. } => raw.clone(),
                    _ => None,
                };
                (Vec::new(), Failure::new(FailureStage::Decode, &err, raw))
            }
        };

        let dead_letter = self
            .config
            .max_delivery_attempts
            .zip(attempt)
            .is_some_and(|(max, n)| n >= max);
        self.record(rows, &failure, attempt, dead_letter).await;

        if dead_letter {
            warn!(attempt, error = %failure.message, "giving up on message, dead-lettering");
            delivery.nack(false).await?;
            Ok(DeliveryOutcome::DeadLettered {
                error: failure.message,
            })
        } else {
            warn!(
                attempt,
                stage = ?failure.stage,
                error = %failure.message,
                "chunk failed, requeueing"
            );
            delivery.nack(true).await?;
            Ok(DeliveryOutcome::Requeued {
                error: failure.message,
            })
        }
    }

    async fn record(
        &self,
        rows: Vec<RawRow>,
        failure: &Failure,
        attempt: Option<u32>,
        dead_letter: bool,
    ) {
        let stage = if dead_letter {
            FailureStage::DeadLetter
        } else {
            failure.stage
        };
        let entry = FailedInsertEntry::new(rows, failure.message.clone())
            .with_raw(failure.raw.clone())
            .with_attempt(attempt)
            .with_stage(stage);
        if let Err(e) = self.failure_log.append(&entry).await {
            error!(
                error = %e,
                rows = entry.rows.len(),
                "could not record failed chunk; message is still returned to the queue"
            );
        }
    }
}

struct Failure {
    stage: FailureStage,
    message: String,
    raw: Option<String>,
}

impl Failure {
    fn new(stage: FailureStage, err: &IngestError, raw: Option<String>) -> Self {
        Self {
            stage,
            message: err.to_string(),
            raw,
        }
    }
}
