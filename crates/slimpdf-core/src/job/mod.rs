//! Single-file compression job slot.
//!
//! Lifecycle of one job:
//!
//! ```text
//! submit(file, settings)          update_settings(settings)
//!         │                               │
//!         ▼                               ▼
//!    validating ──invalid──► error   debounce timer (500 ms)
//!         │                               │
//!         ▼                               ▼
//!    processing ◄── submit(background) ───┘
//!         │
//!    progress* then success │ error
//!         │
//!         ▼
//!       done ──settings change──► (background recompute, result kept visible)
//! ```
//!
//! Only the most recent dispatch may mutate visible state; anything else is
//! fenced out by job-id mismatch.

mod controller;
pub mod types;
mod validate;

pub use controller::{spawn_job_controller, JobControllerHandle};
pub use validate::validate_file;
