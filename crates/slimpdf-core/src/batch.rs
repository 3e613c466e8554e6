//! Batch scheduler.
//!
//! Runs many independent files through the compute channel strictly one at a
//! time, so peak memory stays bounded to a single file regardless of queue
//! length. Failures are scoped to their item; the scheduler itself never
//! enters an error state.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::compute::{connect_with_retry, ComputeBackend, ComputeChannel, ComputeRequest, ComputeResponse};
use crate::config::{Limits, RetryConfig};
use crate::error::{CompressError, CompressResult};
use crate::job::types::{CompressionAnalysis, InputFile, Settings};
use crate::job::validate_file;

/// Status of one queued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Processing,
    Done,
    Error,
}

/// One file in the batch queue. Independent lifecycle from its neighbors.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: Uuid,
    pub file: InputFile,
    pub status: BatchStatus,
    /// 0..=100; only meaningful while processing.
    pub progress: u8,
    pub analysis: Option<Arc<CompressionAnalysis>>,
    pub error: Option<CompressError>,
}

/// Per-status counts, recomputed from the live queue on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub done: usize,
    pub error: usize,
}

/// Serial multi-file scheduler over a shared compute channel.
pub struct BatchScheduler {
    backend: Arc<dyn ComputeBackend>,
    limits: Limits,
    retry: RetryConfig,
    queue: Arc<RwLock<Vec<BatchItem>>>,
    /// Shared warm channel; taken out while an item is in flight.
    channel: Mutex<Option<ComputeChannel>>,
}

impl BatchScheduler {
    pub fn new(backend: Arc<dyn ComputeBackend>, limits: Limits, retry: RetryConfig) -> Self {
        Self {
            backend,
            limits,
            retry,
            queue: Arc::new(RwLock::new(Vec::new())),
            channel: Mutex::new(None),
        }
    }

    /// Add files to the queue, validating each on entry.
    ///
    /// Invalid files are queued already in `Error` status rather than
    /// rejected, so the queue stays the single source of truth for what the
    /// user tried to compress. Returns the new item ids in input order.
    pub async fn add_files(&self, files: Vec<InputFile>) -> Vec<Uuid> {
        let mut queue = self.queue.write().await;
        let mut ids = Vec::with_capacity(files.len());

        for file in files {
            let id = Uuid::new_v4();
            let item = match validate_file(&file, &self.limits) {
                Ok(()) => BatchItem {
                    id,
                    file,
                    status: BatchStatus::Queued,
                    progress: 0,
                    analysis: None,
                    error: None,
                },
                Err(error) => {
                    tracing::warn!(item_id = %id, error = %error, "File rejected on entry");
                    BatchItem {
                        id,
                        file,
                        status: BatchStatus::Error,
                        progress: 0,
                        analysis: None,
                        error: Some(error),
                    }
                }
            };
            ids.push(id);
            queue.push(item);
        }

        ids
    }

    /// Remove an item regardless of status.
    ///
    /// If it was the item currently processing, its eventual result is
    /// discarded because results are only applied to items still present.
    pub async fn remove_file(&self, id: Uuid) -> bool {
        let mut queue = self.queue.write().await;
        let before = queue.len();
        queue.retain(|item| item.id != id);
        queue.len() != before
    }

    /// Tear down the shared channel and empty the queue.
    pub async fn clear_queue(&self) {
        *self.channel.lock().await = None;
        self.queue.write().await.clear();
        tracing::debug!("Batch queue cleared");
    }

    /// Snapshot of the queue.
    pub async fn items(&self) -> Vec<BatchItem> {
        self.queue.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.queue.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.read().await.is_empty()
    }

    /// Per-status counts, recomputed from the current queue.
    pub async fn stats(&self) -> BatchStats {
        let queue = self.queue.read().await;
        let count = |status: BatchStatus| queue.iter().filter(|i| i.status == status).count();
        BatchStats {
            total: queue.len(),
            queued: count(BatchStatus::Queued),
            processing: count(BatchStatus::Processing),
            done: count(BatchStatus::Done),
            error: count(BatchStatus::Error),
        }
    }

    /// Process every queued item strictly sequentially with fixed settings.
    ///
    /// Each iteration re-reads the live queue, so items removed mid-batch are
    /// skipped and their results discarded. A failing item is marked `Error`
    /// and the batch continues.
    pub async fn start_processing(&self, settings: &Settings) -> BatchStats {
        loop {
            let next = {
                let queue = self.queue.read().await;
                queue
                    .iter()
                    .find(|item| item.status == BatchStatus::Queued)
                    .map(|item| (item.id, item.file.clone()))
            };
            let Some((id, file)) = next else {
                break;
            };

            // Re-confirm the item is still present and still queued.
            let claimed = {
                let mut queue = self.queue.write().await;
                match queue
                    .iter_mut()
                    .find(|item| item.id == id && item.status == BatchStatus::Queued)
                {
                    Some(item) => {
                        item.status = BatchStatus::Processing;
                        item.progress = 0;
                        true
                    }
                    None => false,
                }
            };
            if !claimed {
                continue;
            }

            tracing::info!(item_id = %id, file = %file.name, "Processing batch item");
            let result = self.process_item(id, &file, settings).await;

            let mut queue = self.queue.write().await;
            let Some(item) = queue.iter_mut().find(|item| item.id == id) else {
                tracing::debug!(item_id = %id, "Item removed mid-batch, result discarded");
                continue;
            };
            match result {
                Ok(analysis) => {
                    tracing::info!(
                        item_id = %id,
                        original_size = analysis.original_size,
                        final_size = analysis.final_size(),
                        "Batch item done"
                    );
                    item.progress = 100;
                    item.analysis = Some(Arc::new(analysis));
                    item.error = None;
                    item.status = BatchStatus::Done;
                }
                Err(error) => {
                    tracing::error!(item_id = %id, error = %error, "Batch item failed");
                    item.error = Some(error);
                    item.status = BatchStatus::Error;
                }
            }
        }

        self.stats().await
    }

    /// Run one item to its terminal message on the shared channel.
    async fn process_item(
        &self,
        item_id: Uuid,
        file: &InputFile,
        settings: &Settings,
    ) -> CompressResult<CompressionAnalysis> {
        let job_id = Uuid::new_v4();
        let mut channel = self.take_channel().await?;

        channel
            .start(ComputeRequest {
                job_id,
                file_name: file.name.clone(),
                bytes: file.bytes.clone(),
                settings: settings.clone(),
            })
            .await?;

        loop {
            match channel.recv().await {
                None => {
                    // Channel torn down by not storing it back.
                    return Err(CompressError::channel("Compute channel disconnected"));
                }
                Some(response) if response.job_id() != job_id => {
                    tracing::debug!(job_id = %response.job_id(), "Fenced stray batch message");
                }
                Some(ComputeResponse::Progress { percent, .. }) => {
                    self.set_item_progress(item_id, percent).await;
                }
                Some(ComputeResponse::Success { analysis, .. }) => {
                    self.store_channel(channel).await;
                    return Ok(analysis);
                }
                Some(ComputeResponse::Error { error, .. }) => {
                    self.store_channel(channel).await;
                    return Err(error);
                }
            }
        }
    }

    async fn take_channel(&self) -> CompressResult<ComputeChannel> {
        if let Some(channel) = self.channel.lock().await.take() {
            return Ok(channel);
        }
        connect_with_retry(&self.backend, &self.retry).await
    }

    /// Return the warm channel after an item, unless the queue was cleared in
    /// the meantime (in which case it is dropped).
    async fn store_channel(&self, channel: ComputeChannel) {
        if self.queue.read().await.is_empty() {
            return;
        }
        *self.channel.lock().await = Some(channel);
    }

    async fn set_item_progress(&self, item_id: Uuid, percent: u8) {
        let mut queue = self.queue.write().await;
        if let Some(item) = queue.iter_mut().find(|item| item.id == item_id) {
            item.progress = percent.min(100);
        }
    }
}
