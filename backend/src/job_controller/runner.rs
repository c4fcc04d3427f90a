//! Runs conversion jobs in the background and records how they end.
//!
//! ## Workflow
//!
//! 1. **Admission**: `try_admit` hands out one of `max_pending` permits. With
//!    none left the upload is refused (`Busy`) before a job record exists.
//! 2. **Dispatch**: the job is spawned on a `TaskTracker`, on the runtime the
//!    runner was built on rather than the HTTP worker that accepted it, and
//!    waits, still `started`, for one of `max_running` run slots.
//! 3. **Run**: the job is marked `processing` and the blocking pipeline runs
//!    on `spawn_blocking`. Its progress is forwarded through a channel that
//!    is fully drained before the terminal update, so `completed`/`failed`
//!    is always the last write.
//! 4. **Finish**: the uploaded input is removed as soon as the pipeline
//!    returns (or unwinds). A failed job's output file is removed too.
//!
//! `shutdown` stops admissions, fails jobs that never got a slot and waits a
//! bounded time for running ones.

use crate::config::JobsConfig;
use crate::error::ServiceError;
use crate::job_controller::state::{JobStore, JobUpdate};
use crate::pipeline::progress::{ProgressSink, ProgressUpdate};
use crate::pipeline::Pipeline;
use log::{debug, error, info, warn};
use common::jobs::JobId;
use common::requests::OcrOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

const PROGRESS_BUFFER: usize = 32;

/// A reserved place for one job, from upload until the job finishes.
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

/// How a dispatched job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(PathBuf),
    Failed { error: String, input_error: bool },
}

/// Forwards pipeline progress from the blocking thread to the async side.
struct ChannelSink {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressSink for ChannelSink {
    fn report(&self, update: ProgressUpdate) {
        // The receiver only goes away once the job task itself is gone.
        let _ = self.tx.blocking_send(update);
    }
}

#[derive(Clone)]
pub struct JobRunner {
    store: JobStore,
    pipeline: Arc<Pipeline>,
    outputs_dir: PathBuf,
    admission: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    runtime: Handle,
}

impl JobRunner {
    /// Must be called from inside the runtime that should own job tasks.
    /// HTTP workers come and go with the server; jobs have to outlive them.
    pub fn new(
        store: JobStore,
        pipeline: Pipeline,
        outputs_dir: impl Into<PathBuf>,
        config: &JobsConfig,
    ) -> Self {
        JobRunner {
            store,
            pipeline: Arc::new(pipeline),
            outputs_dir: outputs_dir.into(),
            admission: Arc::new(Semaphore::new(config.max_pending.max(1))),
            slots: Arc::new(Semaphore::new(config.max_running.max(1))),
            tracker: TaskTracker::new(),
            runtime: Handle::current(),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Reserves room for one more job, or says why there is none.
    pub fn try_admit(&self) -> Result<Admission, ServiceError> {
        match self.admission.clone().try_acquire_owned() {
            Ok(permit) => Ok(Admission { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(ServiceError::Busy),
            Err(TryAcquireError::Closed) => Err(ServiceError::ShuttingDown),
        }
    }

    /// Starts converting `input` for job `id` in the background.
    ///
    /// The runner takes ownership of `input` and deletes it once the
    /// pipeline is done with it. The returned handle resolves once the job
    /// is terminal; dropping it does not cancel the job.
    pub fn dispatch(
        &self,
        admission: Admission,
        id: JobId,
        input: TempPath,
        options: OcrOptions,
    ) -> JoinHandle<JobOutcome> {
        let runner = self.clone();
        self.tracker.spawn_on(
            async move {
                let outcome = runner.execute(id, input, options).await;
                drop(admission);
                outcome
            },
            &self.runtime,
        )
    }

    fn output_path(&self, id: JobId) -> PathBuf {
        self.outputs_dir.join(format!("{}.pdf", id.simple()))
    }

    async fn execute(&self, id: JobId, input: TempPath, options: OcrOptions) -> JobOutcome {
        let _slot = match self.slots.clone().acquire_owned().await {
            Ok(slot) => slot,
            Err(_) => {
                return self
                    .fail(id, None, "Server is shutting down".to_string(), false)
                    .await
            }
        };

        info!("[{}] Processing started", id);
        if let Err(e) = self
            .store
            .apply(
                id,
                JobUpdate::Processing {
                    message: "Starting OCR processing".to_string(),
                },
            )
            .await
        {
            warn!("[{}] Job disappeared before it could start: {}", id, e);
            return JobOutcome::Failed {
                error: e.to_string(),
                input_error: false,
            };
        }

        let output = self.output_path(id);
        let (tx, mut rx) = mpsc::channel(PROGRESS_BUFFER);
        let pipeline = self.pipeline.clone();
        let blocking_output = output.clone();
        let label = id.to_string();

        let conversion = tokio::task::spawn_blocking(move || {
            let sink = ChannelSink { tx };
            let result = pipeline.run(&input, &blocking_output, &options, &sink, &label);
            if let Err(e) = input.close() {
                warn!("[{}] Failed to remove uploaded input: {}", label, e);
            }
            result
        });

        while let Some(update) = rx.recv().await {
            let applied = self
                .store
                .apply(
                    id,
                    JobUpdate::Progress {
                        progress: update.percent,
                        message: update.message,
                        pages_total: update.pages_total,
                        pages_processed: update.pages_processed,
                    },
                )
                .await;
            if let Err(e) = applied {
                debug!("[{}] Dropped progress update: {}", id, e);
            }
        }

        match conversion.await {
            Ok(Ok(done)) => {
                let completed = JobUpdate::Completed {
                    output: output.clone(),
                    pages_processed: done.pages_processed,
                    message: done.summary(),
                };
                match self.store.apply(id, completed).await {
                    Ok(()) => {
                        info!(
                            "[{}] Completed via {} strategy ({:?} of {:?} page(s))",
                            id, done.strategy, done.pages_processed, done.pages_total
                        );
                        JobOutcome::Completed(output)
                    }
                    Err(e) => {
                        warn!("[{}] Could not record completion: {}", id, e);
                        remove_artifact(&output).await;
                        JobOutcome::Failed {
                            error: e.to_string(),
                            input_error: false,
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                let input_error = e.is_input_error();
                self.fail(id, Some(&output), e.to_string(), input_error)
                    .await
            }
            Err(join_error) => {
                error!("[{}] Conversion crashed: {}", id, join_error);
                self.fail(
                    id,
                    Some(&output),
                    "Processing failed: internal error".to_string(),
                    false,
                )
                .await
            }
        }
    }

    async fn fail(
        &self,
        id: JobId,
        output: Option<&Path>,
        error: String,
        input_error: bool,
    ) -> JobOutcome {
        warn!("[{}] Failed: {}", id, error);
        if let Some(output) = output {
            remove_artifact(output).await;
        }
        if let Err(e) = self
            .store
            .apply(
                id,
                JobUpdate::Failed {
                    error: error.clone(),
                },
            )
            .await
        {
            warn!("[{}] Could not record failure: {}", id, e);
        }
        JobOutcome::Failed { error, input_error }
    }

    /// Refuses new jobs, fails the ones still queued for a slot and waits up
    /// to `grace` for running ones. Returns how many were still running when
    /// the wait gave up.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.admission.close();
        self.slots.close();
        self.tracker.close();

        let pending = self.tracker.len();
        if pending == 0 {
            return 0;
        }
        info!("Waiting up to {:?} for {} job(s) to finish", grace, pending);
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => 0,
            Err(_) => {
                let abandoned = self.tracker.len();
                warn!("Abandoning {} unfinished job(s)", abandoned);
                abandoned
            }
        }
    }
}

/// Removes a job artifact, tolerating one that was never created.
pub(crate) async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::EngineError;
    use crate::pipeline::testing::{FakeTools, PDF_BYTES};
    use common::jobs::JobStatus;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    struct Fixture {
        dir: TempDir,
        runner: JobRunner,
    }

    fn fixture(tools: FakeTools, max_running: usize, max_pending: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let outputs = dir.path().join("outputs");
        std::fs::create_dir_all(&outputs).unwrap();
        let mut config = Config::default().jobs;
        config.max_running = max_running;
        config.max_pending = max_pending;

        let tools = Arc::new(tools);
        let pipeline = Pipeline::new(FakeTools::toolchain(&tools), dir.path());
        let runner = JobRunner::new(JobStore::new(), pipeline, outputs, &config);
        Fixture { dir, runner }
    }

    impl Fixture {
        fn upload(&self, bytes: &[u8]) -> TempPath {
            let mut file = NamedTempFile::new_in(self.dir.path()).unwrap();
            file.write_all(bytes).unwrap();
            file.into_temp_path()
        }

        async fn submit(&self, bytes: &[u8]) -> (JobId, PathBuf, JoinHandle<JobOutcome>) {
            let admission = self.runner.try_admit().unwrap();
            let input = self.upload(bytes);
            let input_path = input.to_path_buf();
            let id = self.runner.store().create("scan.pdf").await;
            let handle = self
                .runner
                .dispatch(admission, id, input, OcrOptions::default());
            (id, input_path, handle)
        }
    }

    #[tokio::test]
    async fn successful_job_completes_and_releases_input() {
        let fx = fixture(FakeTools::with_pages(1), 2, 4);
        let (id, input, handle) = fx.submit(PDF_BYTES).await;

        let outcome = handle.await.unwrap();
        let JobOutcome::Completed(output) = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };

        let job = fx.runner.store().get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.pages_processed, Some(1));
        assert_eq!(job.output_location.as_deref(), Some(output.as_path()));
        assert!(job.processing_time().is_some());
        assert!(std::fs::read(&output).unwrap().starts_with(b"%PDF-"));
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn failed_job_leaves_no_output_and_releases_input() {
        let fx = fixture(
            FakeTools::with_pages(1)
                .with_empty_output(),
            2,
            4,
        );
        let (id, input, handle) = fx.submit(PDF_BYTES).await;

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { input_error: false, .. }));

        let job = fx.runner.store().get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("no output"));
        assert!(job.output_location.is_none());
        assert!(!fx.runner.output_path(id).exists());
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn empty_upload_is_an_input_error() {
        let fx = fixture(FakeTools::with_pages(1), 2, 4);
        let (id, input, handle) = fx.submit(b"").await;

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { input_error: true, .. }));
        assert_eq!(fx.runner.store().get(id).await.unwrap().status, JobStatus::Failed);
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn crash_inside_pipeline_is_recorded_as_failure() {
        let fx = fixture(FakeTools::with_pages(1).panicking(), 2, 4);
        let (id, input, handle) = fx.submit(PDF_BYTES).await;

        handle.await.unwrap();
        let job = fx.runner.store().get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Processing failed: internal error"));
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_another_job() {
        let fx = fixture(
            FakeTools::with_pages(1)
                .failing_document(EngineError::Encrypted)
                .failing_page(1),
            2,
            4,
        );
        let (bad, _, bad_handle) = fx.submit(PDF_BYTES).await;
        let (good, _, good_handle) = fx.submit(PDF_BYTES).await;
        bad_handle.await.unwrap();
        good_handle.await.unwrap();

        // Only the first whole-document call fails, so whichever job ran
        // first fails and the other completes.
        let statuses = [
            fx.runner.store().get(bad).await.unwrap().status,
            fx.runner.store().get(good).await.unwrap().status,
        ];
        assert!(statuses.contains(&JobStatus::Failed));
        assert!(statuses.contains(&JobStatus::Completed));
    }

    #[tokio::test]
    async fn admission_is_bounded() {
        let fx = fixture(
            FakeTools::with_pages(1).slow(Duration::from_millis(200)),
            1,
            2,
        );
        let (_, _, first) = fx.submit(PDF_BYTES).await;
        let (_, _, second) = fx.submit(PDF_BYTES).await;
        assert!(matches!(fx.runner.try_admit(), Err(ServiceError::Busy)));

        first.await.unwrap();
        second.await.unwrap();
        assert!(fx.runner.try_admit().is_ok());
    }

    #[tokio::test]
    async fn queued_job_waits_in_started_state() {
        let fx = fixture(
            FakeTools::with_pages(1).slow(Duration::from_millis(300)),
            1,
            4,
        );
        let (_, _, first) = fx.submit(PDF_BYTES).await;
        let (queued, _, second) = fx.submit(PDF_BYTES).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            fx.runner.store().get(queued).await.unwrap().status,
            JobStatus::Started
        );

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(
            fx.runner.store().get(queued).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn shutdown_waits_for_jobs_and_closes_admission() {
        let fx = fixture(
            FakeTools::with_pages(1).slow(Duration::from_millis(100)),
            2,
            4,
        );
        let (id, _, _handle) = fx.submit(PDF_BYTES).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(fx.runner.shutdown(Duration::from_secs(5)).await, 0);
        assert_eq!(
            fx.runner.store().get(id).await.unwrap().status,
            JobStatus::Completed
        );
        assert!(matches!(
            fx.runner.try_admit(),
            Err(ServiceError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn job_outlives_the_runtime_that_dispatched_it() {
        let fx = fixture(
            FakeTools::with_pages(1).slow(Duration::from_millis(100)),
            2,
            4,
        );
        let admission = fx.runner.try_admit().unwrap();
        let id = fx.runner.store().create("scan.pdf").await;
        let input = fx.upload(PDF_BYTES);

        // Stands in for an HTTP worker whose runtime is torn down at stop.
        let runner = fx.runner.clone();
        std::thread::spawn(move || {
            let worker = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            worker.block_on(async move {
                let _ = runner.dispatch(admission, id, input, OcrOptions::default());
            });
        })
        .join()
        .unwrap();

        assert_eq!(fx.runner.shutdown(Duration::from_secs(5)).await, 0);
        assert_eq!(
            fx.runner.store().get(id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn shutdown_reports_abandoned_jobs() {
        let fx = fixture(
            FakeTools::with_pages(1).slow(Duration::from_millis(500)),
            1,
            4,
        );
        let (_, _, _running) = fx.submit(PDF_BYTES).await;
        let (queued, queued_input, queued_handle) = fx.submit(PDF_BYTES).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(fx.runner.shutdown(Duration::from_millis(10)).await, 1);

        // The job that never got a slot is failed rather than left hanging.
        queued_handle.await.unwrap();
        let job = fx.runner.store().get(queued).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Server is shutting down"));
        assert!(!queued_input.exists());
    }
}
