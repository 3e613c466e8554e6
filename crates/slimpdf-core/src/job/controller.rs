//! Single-slot job controller.
//!
//! Owns one logical job slot: serializes dispatches to the compute channel,
//! fences out results from superseded jobs, and debounces settings-driven
//! recomputation. Runs as a tokio task; callers interact through a cloneable
//! handle and an event receiver.
//!
//! Cancellation is logical only. A superseded job keeps computing in the
//! background, but its messages carry a dead job id and are dropped on
//! arrival, so its output can never become visible.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::compute::{connect_with_retry, ComputeBackend, ComputeChannel, ComputeRequest, ComputeResponse};
use crate::config::{ControllerConfig, Limits};
use crate::error::CompressError;

use super::types::{
    CompressionAnalysis, InputFile, JobEvent, JobProgress, JobSnapshot, JobStatus, Settings,
};
use super::validate::validate_file;

/// Commands accepted by the controller task.
enum JobCommand {
    Submit {
        file: InputFile,
        settings: Settings,
        background: bool,
    },
    UpdateSettings {
        settings: Settings,
    },
    Reset,
}

/// Handle to the job controller.
///
/// The task stops when all handles are dropped (command channel closes).
#[derive(Clone)]
pub struct JobControllerHandle {
    tx: mpsc::Sender<JobCommand>,
    snapshot: Arc<RwLock<JobSnapshot>>,
}

impl JobControllerHandle {
    /// Submit a file for compression.
    ///
    /// Foreground submissions validate locally and fail fast before any
    /// channel traffic. Background submissions keep the previous result
    /// visible while recomputing.
    pub async fn submit(
        &self,
        file: InputFile,
        settings: Settings,
        background: bool,
    ) -> anyhow::Result<()> {
        self.tx
            .send(JobCommand::Submit {
                file,
                settings,
                background,
            })
            .await
            .map_err(|_| anyhow::anyhow!("Job controller stopped"))
    }

    /// Report a settings change. A recompute fires once the settings stop
    /// changing for the configured debounce interval, and only if they
    /// differ by value from the last submitted settings.
    pub async fn update_settings(&self, settings: Settings) -> anyhow::Result<()> {
        self.tx
            .send(JobCommand::UpdateSettings { settings })
            .await
            .map_err(|_| anyhow::anyhow!("Job controller stopped"))
    }

    /// Clear the slot back to idle. The warm compute channel survives so the
    /// next file avoids a cold start. Idempotent.
    pub async fn reset(&self) -> anyhow::Result<()> {
        self.tx
            .send(JobCommand::Reset)
            .await
            .map_err(|_| anyhow::anyhow!("Job controller stopped"))
    }

    pub async fn status(&self) -> JobStatus {
        self.snapshot.read().await.status.clone()
    }

    pub async fn analysis(&self) -> Option<Arc<CompressionAnalysis>> {
        self.snapshot.read().await.analysis.clone()
    }

    pub async fn is_updating(&self) -> bool {
        self.snapshot.read().await.is_updating
    }

    pub async fn progress(&self) -> Option<JobProgress> {
        self.snapshot.read().await.progress.clone()
    }
}

/// Spawn the job controller task.
///
/// Returns a handle for commands/observers and a receiver for UI events.
pub fn spawn_job_controller(
    backend: Arc<dyn ComputeBackend>,
    config: ControllerConfig,
    limits: Limits,
) -> (JobControllerHandle, mpsc::Receiver<JobEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<JobCommand>(64);
    let (event_tx, event_rx) = mpsc::channel::<JobEvent>(64);
    let snapshot = Arc::new(RwLock::new(JobSnapshot::default()));

    let handle = JobControllerHandle {
        tx: cmd_tx,
        snapshot: snapshot.clone(),
    };

    let controller = Controller {
        backend,
        config,
        limits,
        snapshot,
        events: event_tx,
        channel: None,
        live_job: None,
        current_file: None,
        last_submitted: None,
        desired_settings: None,
        debounce_deadline: None,
    };

    tokio::spawn(controller.run(cmd_rx));

    (handle, event_rx)
}

/// What woke the controller loop.
enum Wake {
    Command(Option<JobCommand>),
    Debounce,
    Response(Option<ComputeResponse>),
}

struct Controller {
    backend: Arc<dyn ComputeBackend>,
    config: ControllerConfig,
    limits: Limits,
    snapshot: Arc<RwLock<JobSnapshot>>,
    events: mpsc::Sender<JobEvent>,
    /// Warm compute channel, created lazily and reused across submissions.
    channel: Option<ComputeChannel>,
    /// Id of the only job allowed to mutate visible state.
    live_job: Option<Uuid>,
    /// File behind the current analysis; recomputes resubmit it.
    current_file: Option<InputFile>,
    /// Settings of the last dispatch that actually fired. Only moves when a
    /// submit happens, so a settled-but-unchanged value never re-triggers.
    last_submitted: Option<Settings>,
    /// Most recent settings reported by the caller.
    desired_settings: Option<Settings>,
    debounce_deadline: Option<Instant>,
}

impl Controller {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<JobCommand>) {
        tracing::debug!("Job controller started");

        loop {
            let deadline = self.debounce_deadline;

            // Resolve the wakeup first so the borrows held by the select
            // futures end before any handler touches `self`.
            let wake = tokio::select! {
                biased;

                cmd = cmd_rx.recv() => Wake::Command(cmd),

                _ = sleep_until(deadline), if deadline.is_some() => Wake::Debounce,

                response = next_response(&mut self.channel) => Wake::Response(response),
            };

            match wake {
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Command(None) => break,
                Wake::Debounce => {
                    self.debounce_deadline = None;
                    self.fire_debounced_recompute().await;
                }
                Wake::Response(Some(response)) => self.handle_response(response).await,
                Wake::Response(None) => self.handle_channel_closed().await,
            }
        }

        tracing::debug!("Job controller stopped");
    }

    async fn handle_command(&mut self, cmd: JobCommand) {
        match cmd {
            JobCommand::Submit {
                file,
                settings,
                background,
            } => self.do_submit(file, settings, background).await,
            JobCommand::UpdateSettings { settings } => {
                self.desired_settings = Some(settings);
                self.rearm_debounce().await;
            }
            JobCommand::Reset => self.do_reset().await,
        }
    }

    async fn do_submit(&mut self, file: InputFile, settings: Settings, background: bool) {
        // A fresh id supersedes any in-flight job; its messages become no-ops.
        let job_id = Uuid::new_v4();
        self.live_job = Some(job_id);
        self.debounce_deadline = None;

        if background {
            let mut snapshot = self.snapshot.write().await;
            snapshot.is_updating = true;
        } else {
            self.set_status(JobStatus::Validating).await;
            if let Err(error) = validate_file(&file, &self.limits) {
                tracing::warn!(file = %file.name, error = %error, "Validation failed");
                self.fail(error).await;
                return;
            }
            self.set_status(JobStatus::Processing).await;
        }

        tracing::info!(
            job_id = %job_id,
            file = %file.name,
            size = file.size(),
            background,
            "Dispatching compression job"
        );

        let request = ComputeRequest {
            job_id,
            file_name: file.name.clone(),
            bytes: file.bytes.clone(),
            settings: settings.clone(),
        };
        self.current_file = Some(file);
        self.last_submitted = Some(settings);

        if let Err(error) = self.dispatch(request).await {
            self.fail(error).await;
        }
    }

    /// Ensure a channel exists (retrying the stale case) and start the job.
    async fn dispatch(&mut self, request: ComputeRequest) -> Result<(), CompressError> {
        if self.channel.is_none() {
            let channel = connect_with_retry(&self.backend, &self.config.retry).await?;
            self.channel = Some(channel);
        }

        let Some(channel) = self.channel.as_ref() else {
            return Err(CompressError::channel("Compute channel unavailable"));
        };

        if let Err(error) = channel.start(request).await {
            // Tear down so the next submission starts clean.
            self.channel = None;
            return Err(error);
        }

        Ok(())
    }

    async fn handle_response(&mut self, response: ComputeResponse) {
        let job_id = response.job_id();
        if Some(job_id) != self.live_job {
            tracing::debug!(job_id = %job_id, "Fenced message from superseded job");
            return;
        }

        match response {
            ComputeResponse::Progress {
                percent, message, ..
            } => {
                // Background recomputes keep showing the previous result;
                // progress updates would only flicker it.
                let suppressed = {
                    let mut snapshot = self.snapshot.write().await;
                    if snapshot.is_updating {
                        true
                    } else {
                        snapshot.progress = Some(JobProgress {
                            percent,
                            message: message.clone(),
                        });
                        false
                    }
                };
                if !suppressed {
                    let _ = self
                        .events
                        .send(JobEvent::Progress { percent, message })
                        .await;
                }
            }
            ComputeResponse::Success { analysis, .. } => {
                let original_size = analysis.original_size;
                let final_size = analysis.final_size();
                {
                    let mut snapshot = self.snapshot.write().await;
                    // Wholesale replacement; the previous buffer's refcount
                    // drops here.
                    snapshot.analysis = Some(Arc::new(analysis));
                    snapshot.is_updating = false;
                    snapshot.progress = None;
                    snapshot.status = JobStatus::Done;
                }
                tracing::info!(job_id = %job_id, original_size, final_size, "Compression complete");
                let _ = self
                    .events
                    .send(JobEvent::StatusChanged {
                        status: JobStatus::Done,
                    })
                    .await;
                let _ = self
                    .events
                    .send(JobEvent::Completed {
                        original_size,
                        final_size,
                    })
                    .await;

                // Settings may have moved while we were processing; settle
                // them through the normal debounce path.
                self.rearm_debounce().await;
            }
            ComputeResponse::Error { error, .. } => {
                tracing::error!(job_id = %job_id, error = %error, "Compression failed");
                self.fail(error).await;
            }
        }
    }

    /// The compute unit hung up. Terminal for the in-flight job, if any, but
    /// the slot stays usable for the next submission.
    async fn handle_channel_closed(&mut self) {
        self.channel = None;
        let in_flight = {
            let snapshot = self.snapshot.read().await;
            snapshot.status == JobStatus::Processing || snapshot.is_updating
        };
        if in_flight {
            self.fail(CompressError::channel("Compute channel disconnected"))
                .await;
        } else {
            tracing::debug!("Idle compute channel closed");
        }
    }

    async fn fire_debounced_recompute(&mut self) {
        let Some(file) = self.current_file.clone() else {
            return;
        };
        let Some(settings) = self.desired_settings.clone() else {
            return;
        };
        if self.last_submitted.as_ref() == Some(&settings) {
            return;
        }
        self.do_submit(file, settings, true).await;
    }

    /// Arm (or re-arm) the debounce timer if the desired settings differ by
    /// value from the last submitted ones while a result is showing.
    async fn rearm_debounce(&mut self) {
        let status = self.snapshot.read().await.status.clone();
        let changed = match (&self.desired_settings, &self.last_submitted) {
            (Some(desired), Some(submitted)) => desired != submitted,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if status == JobStatus::Done && self.current_file.is_some() && changed {
            self.debounce_deadline = Some(Instant::now() + self.config.debounce);
        } else {
            self.debounce_deadline = None;
        }
    }

    async fn do_reset(&mut self) {
        // Invalidates the live id; stray messages fence out. The warm
        // channel is deliberately kept for the next file.
        self.live_job = None;
        self.current_file = None;
        self.last_submitted = None;
        self.desired_settings = None;
        self.debounce_deadline = None;
        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.status = JobStatus::Idle;
            snapshot.is_updating = false;
            snapshot.progress = None;
            snapshot.analysis = None;
        }
        let _ = self
            .events
            .send(JobEvent::StatusChanged {
                status: JobStatus::Idle,
            })
            .await;
    }

    async fn set_status(&self, status: JobStatus) {
        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.status = status.clone();
        }
        let _ = self.events.send(JobEvent::StatusChanged { status }).await;
    }

    async fn fail(&mut self, error: CompressError) {
        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.status = JobStatus::Error {
                error: error.clone(),
            };
            snapshot.is_updating = false;
            snapshot.progress = None;
        }
        let _ = self.events.send(JobEvent::Failed { error }).await;
    }
}

/// Receive from the warm channel, or park forever while there is none.
async fn next_response(channel: &mut Option<ComputeChannel>) -> Option<ComputeResponse> {
    match channel {
        Some(channel) => channel.recv().await,
        None => futures::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::compute::testing::{
        error_reply, progress_reply, success_reply, ScriptedBackend,
    };

    fn test_config() -> ControllerConfig {
        ControllerConfig {
            debounce: Duration::from_millis(50),
            retry: crate::config::RetryConfig {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
        }
    }

    fn pdf_file(name: &str, size: usize) -> InputFile {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.resize(size.max(bytes.len()), b'x');
        InputFile::new(name, bytes)
    }

    async fn wait_for_done(handle: &JobControllerHandle) {
        timeout(Duration::from_secs(2), async {
            loop {
                if handle.status().await == JobStatus::Done && !handle.is_updating().await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not reach done");
    }

    async fn wait_for_error(handle: &JobControllerHandle) -> CompressError {
        timeout(Duration::from_secs(2), async {
            loop {
                if let JobStatus::Error { error } = handle.status().await {
                    return error;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not reach error")
    }

    #[tokio::test]
    async fn foreground_submit_completes_and_stores_analysis() {
        let backend = Arc::new(ScriptedBackend::new(|req| {
            vec![progress_reply(req, 50), success_reply(req, 100)]
        }));
        let (handle, _events) =
            spawn_job_controller(backend.clone(), test_config(), Limits::default());

        handle
            .submit(pdf_file("doc.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        wait_for_done(&handle).await;

        let analysis = handle.analysis().await.expect("analysis present");
        assert_eq!(analysis.original_size, 1000);
        assert_eq!(analysis.final_size(), 100);
        assert_eq!(backend.request_count().await, 1);
    }

    #[tokio::test]
    async fn oversized_file_fails_without_channel_dispatch() {
        let backend = Arc::new(ScriptedBackend::new(|req| vec![success_reply(req, 10)]));
        let limits = Limits {
            max_file_size: 100,
            ..Limits::default()
        };
        let (handle, _events) = spawn_job_controller(backend.clone(), test_config(), limits);

        handle
            .submit(pdf_file("big.pdf", 500), Settings::default(), false)
            .await
            .unwrap();
        let error = wait_for_error(&handle).await;

        assert!(matches!(error, CompressError::FileTooLarge { .. }));
        // No message ever reached the compute channel.
        assert_eq!(backend.request_count().await, 0);
        assert_eq!(backend.connect_count.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_submit_fences_out_the_first() {
        // Each request answers instantly; with two rapid submits both
        // terminal messages arrive, but only the second job id is live.
        let backend = Arc::new(ScriptedBackend::new(|req| {
            let size = if req.settings.image.quality == 40 { 40 } else { 80 };
            vec![success_reply(req, size)]
        }));
        let (handle, _events) =
            spawn_job_controller(backend.clone(), test_config(), Limits::default());

        let mut settings_a = Settings::default();
        settings_a.image.quality = 80;
        let mut settings_b = Settings::default();
        settings_b.image.quality = 40;

        handle
            .submit(pdf_file("doc.pdf", 1000), settings_a, false)
            .await
            .unwrap();
        handle
            .submit(pdf_file("doc.pdf", 1000), settings_b, false)
            .await
            .unwrap();
        wait_for_done(&handle).await;
        // Allow any straggler from the first job to arrive and be fenced.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let analysis = handle.analysis().await.expect("analysis present");
        assert_eq!(analysis.final_size(), 40);
        assert_eq!(handle.status().await, JobStatus::Done);
    }

    #[tokio::test]
    async fn settings_changes_coalesce_into_one_recompute() {
        let backend = Arc::new(ScriptedBackend::new(|req| vec![success_reply(req, 100)]));
        let (handle, _events) =
            spawn_job_controller(backend.clone(), test_config(), Limits::default());

        handle
            .submit(pdf_file("doc.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        wait_for_done(&handle).await;
        assert_eq!(backend.request_count().await, 1);

        // Slider drag: several changes inside the debounce window.
        for quality in [60, 50, 45] {
            let mut settings = Settings::default();
            settings.image.quality = quality;
            handle.update_settings(settings).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        wait_for_done(&handle).await;

        // Exactly one recompute, carrying the last settings value.
        assert_eq!(backend.request_count().await, 2);
        let last = backend.last_request().await.unwrap();
        assert_eq!(last.settings.image.quality, 45);
    }

    #[tokio::test]
    async fn unchanged_settings_never_retrigger() {
        let backend = Arc::new(ScriptedBackend::new(|req| vec![success_reply(req, 100)]));
        let (handle, _events) =
            spawn_job_controller(backend.clone(), test_config(), Limits::default());

        handle
            .submit(pdf_file("doc.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        wait_for_done(&handle).await;

        // Freshly constructed but value-equal settings: no recompute.
        handle.update_settings(Settings::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(backend.request_count().await, 1);
    }

    #[tokio::test]
    async fn background_recompute_keeps_result_visible_and_suppresses_progress() {
        let backend = Arc::new(ScriptedBackend::new(|req| {
            vec![progress_reply(req, 10), success_reply(req, 100)]
        }));
        let (handle, mut events) =
            spawn_job_controller(backend.clone(), test_config(), Limits::default());

        handle
            .submit(pdf_file("doc.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        wait_for_done(&handle).await;
        while events.try_recv().is_ok() {}

        let mut settings = Settings::default();
        settings.image.quality = 45;
        handle.update_settings(settings).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        wait_for_done(&handle).await;

        // Status never left done and no progress event surfaced for the
        // background pass.
        assert_eq!(handle.status().await, JobStatus::Done);
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, JobEvent::Progress { .. }));
        }
    }

    #[tokio::test]
    async fn stale_channel_is_retried_then_succeeds() {
        let backend = ScriptedBackend::new(|req| vec![success_reply(req, 100)]);
        backend
            .fail_connects(vec![CompressError::stale("missing chunk")])
            .await;
        let backend = Arc::new(backend);
        let (handle, _events) =
            spawn_job_controller(backend.clone(), test_config(), Limits::default());

        handle
            .submit(pdf_file("doc.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        wait_for_done(&handle).await;

        assert_eq!(
            backend.connect_count.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[tokio::test]
    async fn exhausted_stale_retries_surface_fatal_error() {
        let backend = ScriptedBackend::new(|req| vec![success_reply(req, 100)]);
        backend
            .fail_connects(vec![
                CompressError::stale("missing chunk"),
                CompressError::stale("missing chunk"),
                CompressError::stale("missing chunk"),
            ])
            .await;
        let backend = Arc::new(backend);
        let (handle, _events) =
            spawn_job_controller(backend.clone(), test_config(), Limits::default());

        handle
            .submit(pdf_file("doc.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        let error = wait_for_error(&handle).await;
        assert!(error.is_stale());
    }

    #[tokio::test]
    async fn compute_error_is_terminal_but_slot_recovers() {
        let backend = Arc::new(ScriptedBackend::new(|req| {
            if req.file_name == "bad.pdf" {
                vec![error_reply(req, CompressError::processing("cross reference table broken"))]
            } else {
                vec![success_reply(req, 100)]
            }
        }));
        let (handle, _events) =
            spawn_job_controller(backend.clone(), test_config(), Limits::default());

        handle
            .submit(pdf_file("bad.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        let error = wait_for_error(&handle).await;
        assert!(matches!(error, CompressError::ProcessingFailed { .. }));

        // A fresh submit on the same slot still works.
        handle
            .submit(pdf_file("good.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        wait_for_done(&handle).await;
    }

    #[tokio::test]
    async fn reset_is_idempotent_and_keeps_channel_warm() {
        let backend = Arc::new(ScriptedBackend::new(|req| vec![success_reply(req, 100)]));
        let (handle, _events) =
            spawn_job_controller(backend.clone(), test_config(), Limits::default());

        handle
            .submit(pdf_file("doc.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        wait_for_done(&handle).await;
        assert_eq!(backend.connect_count.load(std::sync::atomic::Ordering::SeqCst), 1);

        handle.reset().await.unwrap();
        handle.reset().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.status().await, JobStatus::Idle);
        assert!(handle.analysis().await.is_none());

        // The next file reuses the warm channel: no second connect.
        handle
            .submit(pdf_file("next.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        wait_for_done(&handle).await;
        assert_eq!(backend.connect_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn messages_after_reset_are_fenced() {
        // The backend delays its reply so the reset lands first.
        let backend = Arc::new(ScriptedBackend::new(|req| vec![success_reply(req, 100)]));
        backend.set_reply_delay(Duration::from_millis(50)).await;
        let (handle, _events) =
            spawn_job_controller(backend.clone(), test_config(), Limits::default());

        handle
            .submit(pdf_file("doc.pdf", 1000), Settings::default(), false)
            .await
            .unwrap();
        handle.reset().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The success straggler was dropped; the slot stayed idle.
        assert_eq!(handle.status().await, JobStatus::Idle);
        assert!(handle.analysis().await.is_none());
    }
}
