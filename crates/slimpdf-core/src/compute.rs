//! Background compute contract.
//!
//! The byte-level compression techniques run inside an isolated compute unit
//! that this crate consumes but does not implement. Communication is a
//! request/response message channel: one `start` request per job, zero or
//! more `progress` messages back, then exactly one terminal `success` or
//! `error`, all tagged with the originating job id.
//!
//! Backends implement [`ComputeBackend`] and hand the orchestration layer a
//! [`ComputeChannel`] built from a pair of mpsc endpoints via
//! [`ComputeChannel::from_parts`]. The controller enforces the single
//! in-flight invariant; backends only need to preserve per-job message order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::error::{CompressError, CompressResult};
use crate::job::types::{CompressionAnalysis, Settings};

/// Request to start a compression run.
#[derive(Debug, Clone)]
pub struct ComputeRequest {
    /// Unique per dispatch; echoed on every response.
    pub job_id: Uuid,
    pub file_name: String,
    pub bytes: Bytes,
    pub settings: Settings,
}

/// Message from the compute unit, tagged with the originating job id.
#[derive(Debug, Clone)]
pub enum ComputeResponse {
    /// Zero or more per job.
    Progress {
        job_id: Uuid,
        percent: u8,
        message: String,
    },
    /// Exactly one per job, terminal.
    Success {
        job_id: Uuid,
        analysis: CompressionAnalysis,
    },
    /// Exactly one per job, terminal, mutually exclusive with `Success`.
    Error {
        job_id: Uuid,
        error: CompressError,
    },
}

impl ComputeResponse {
    pub fn job_id(&self) -> Uuid {
        match self {
            ComputeResponse::Progress { job_id, .. }
            | ComputeResponse::Success { job_id, .. }
            | ComputeResponse::Error { job_id, .. } => *job_id,
        }
    }

    /// True for `Success` and `Error`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ComputeResponse::Progress { .. })
    }
}

/// Live connection to the compute unit.
///
/// Held warm across submissions to avoid per-job startup cost. Dropping the
/// channel tears the connection down; the backend side observes its request
/// receiver closing.
#[derive(Debug)]
pub struct ComputeChannel {
    request_tx: mpsc::Sender<ComputeRequest>,
    response_rx: mpsc::Receiver<ComputeResponse>,
}

impl ComputeChannel {
    /// Assemble a channel from its two mpsc endpoints.
    pub fn from_parts(
        request_tx: mpsc::Sender<ComputeRequest>,
        response_rx: mpsc::Receiver<ComputeResponse>,
    ) -> Self {
        Self {
            request_tx,
            response_rx,
        }
    }

    /// Dispatch a job to the compute unit.
    pub async fn start(&self, request: ComputeRequest) -> CompressResult<()> {
        self.request_tx
            .send(request)
            .await
            .map_err(|_| CompressError::channel("Compute channel closed"))
    }

    /// Receive the next response. `None` means the compute unit hung up.
    pub async fn recv(&mut self) -> Option<ComputeResponse> {
        self.response_rx.recv().await
    }
}

/// Factory for compute channels.
///
/// `connect` fails with [`CompressError::StaleComputeChannel`] when the
/// backend's resources are stale (e.g. a cached script no longer matching the
/// deployed build); the orchestration layer retries that case with backoff.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    async fn connect(&self) -> CompressResult<ComputeChannel>;
}

/// Connect with automatic retry for the transient-staleness signature.
///
/// Non-stale failures surface immediately. Exhausted retries escalate to the
/// fatal reload-required error.
pub(crate) async fn connect_with_retry(
    backend: &Arc<dyn ComputeBackend>,
    retry: &RetryConfig,
) -> CompressResult<ComputeChannel> {
    let mut attempt: u32 = 1;
    loop {
        match backend.connect().await {
            Ok(channel) => return Ok(channel),
            Err(error) if error.is_stale() && attempt < retry.max_attempts => {
                tracing::warn!(attempt, error = %error, "Stale compute channel, retrying");
                tokio::time::sleep(backoff_delay(retry.backoff, attempt)).await;
                attempt += 1;
            }
            Err(error) if error.is_stale() => {
                tracing::error!(attempt, "Compute channel stale after retries");
                return Err(CompressError::stale_reload_required());
            }
            Err(error) => return Err(error),
        }
    }
}

/// Linearly increasing backoff: attempt N waits `base * N`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * attempt
}
