//! SlimPDF Core - Orchestration logic for in-place PDF shrinking
//!
//! This crate contains the layer between user-facing controls and the
//! isolated compute unit that performs the actual byte-level compression:
//! - Single-file job lifecycle with stale-result fencing (jobs)
//! - Debounced settings-driven recomputation (jobs)
//! - Target-size solving over measured per-technique savings (solver)
//! - Serial multi-file batch processing (batch)
//! - The compute unit's message contract (compute - consumed, not implemented)
//!
//! The compute unit itself (stream recompression, image re-encoding, ...) is
//! an external collaborator behind [`compute::ComputeBackend`].

pub mod batch;
pub mod compute;
pub mod config;
pub mod error;
pub mod job;
pub mod solver;

pub use batch::{BatchItem, BatchScheduler, BatchStats, BatchStatus};
pub use compute::{ComputeBackend, ComputeChannel, ComputeRequest, ComputeResponse};
pub use config::{ControllerConfig, Limits, RetryConfig};
pub use error::{CompressError, CompressResult};
pub use job::types::{
    CompressionAnalysis, ImageSettings, InputFile, JobEvent, JobStatus, MethodResult, RiskTier,
    Settings, TechniqueKey,
};
pub use job::{spawn_job_controller, JobControllerHandle};
pub use solver::{
    classify_feasibility, compute_potential, merge_selection, select_methods_for_target,
    settings_for_target_percent, CompressionPotential, Feasibility,
};
