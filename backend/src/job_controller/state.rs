//! In-memory registry of OCR jobs.
//!
//! The map itself sits behind a `RwLock` that is only held long enough to find
//! or insert a record. Each record has its own `Mutex`, so writers on different
//! jobs never wait on each other, while a status read and an update on the
//! same job are serialized and never see a half-written record.
//!
//! Records are only mutated through `JobUpdate`s applied by `Job::apply`,
//! which enforces the lifecycle rules: status never moves backwards,
//! progress never decreases, and a finished job is frozen.
//!
//! `JobsState` bundles the store (through the runner that owns it) with the
//! upload settings. It is injected into the Actix application as `web::Data`.

use crate::config::Config;
use crate::error::StoreError;
use crate::job_controller::runner::JobRunner;
use chrono::{DateTime, Utc};
use common::jobs::{JobId, JobStatus, JobStatusResponse};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct JobsState {
    pub runner: JobRunner,
    /// Where uploads are streamed before a job takes them over.
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub default_languages: Vec<String>,
}

impl JobsState {
    pub fn new(runner: JobRunner, config: &Config) -> Self {
        JobsState {
            runner,
            uploads_dir: config.uploads_dir(),
            max_upload_bytes: config.server.max_upload_bytes,
            default_languages: config.jobs.default_languages.clone(),
        }
    }

    pub fn store(&self) -> &JobStore {
        self.runner.store()
    }
}

/// The full record of one job.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub original_filename: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_total: Option<u32>,
    pub pages_processed: Option<u32>,
    pub output_location: Option<PathBuf>,
    pub error: Option<String>,
}

/// A change reported for a specific job.
///
/// Sent by the job runner (and, through it, by the conversion pipeline) and
/// applied atomically by `JobStore::apply`.
#[derive(Clone, Debug, PartialEq)]
pub enum JobUpdate {
    Processing {
        message: String,
    },
    Progress {
        progress: u8,
        message: String,
        pages_total: Option<u32>,
        pages_processed: Option<u32>,
    },
    Completed {
        output: PathBuf,
        pages_processed: Option<u32>,
        message: String,
    },
    Failed {
        error: String,
    },
}

impl Job {
    fn new(id: JobId, original_filename: String) -> Self {
        Job {
            id,
            status: JobStatus::Started,
            progress: 0,
            message: "Upload received, waiting to start".to_string(),
            original_filename,
            created_at: Utc::now(),
            finished_at: None,
            pages_total: None,
            pages_processed: None,
            output_location: None,
            error: None,
        }
    }

    /// Applies one update, refusing anything that would break the lifecycle.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), StoreError> {
        if self.status.is_terminal() {
            return Err(StoreError::Terminal(self.id));
        }

        match update {
            JobUpdate::Processing { message } => {
                self.status = JobStatus::Processing;
                self.message = message;
            }
            JobUpdate::Progress {
                progress,
                message,
                pages_total,
                pages_processed,
            } => {
                self.status = JobStatus::Processing;
                self.progress = self.progress.max(progress.min(99));
                self.message = message;
                if pages_total.is_some() {
                    self.pages_total = pages_total;
                }
                if let Some(done) = pages_processed {
                    self.pages_processed = Some(self.pages_processed.unwrap_or(0).max(done));
                }
            }
            JobUpdate::Completed {
                output,
                pages_processed,
                message,
            } => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.message = message;
                if pages_processed.is_some() {
                    self.pages_processed = pages_processed;
                }
                self.output_location = Some(output);
                self.error = None;
                self.finished_at = Some(Utc::now());
            }
            JobUpdate::Failed { error } => {
                self.status = JobStatus::Failed;
                self.message = error.clone();
                self.error = Some(error);
                self.output_location = None;
                self.finished_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    /// Seconds from creation to the terminal transition, once there is one.
    pub fn processing_time(&self) -> Option<f64> {
        self.finished_at
            .map(|done| (done - self.created_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn to_response(&self) -> JobStatusResponse {
        JobStatusResponse {
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            pages_total: self.pages_total,
            pages_processed: self.pages_processed,
            processing_time: self.processing_time(),
            error: self.error.clone(),
        }
    }
}

/// A thread-safe, clonable handle to all job records.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, Arc<Mutex<Job>>>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh job in the `started` state.
    pub async fn create(&self, original_filename: impl Into<String>) -> JobId {
        let mut jobs = self.jobs.write().await;
        let mut id = JobId::new();
        while jobs.contains_key(&id) {
            id = JobId::new();
        }
        jobs.insert(id, Arc::new(Mutex::new(Job::new(id, original_filename.into()))));
        id
    }

    async fn record(&self, id: JobId) -> Result<Arc<Mutex<Job>>, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// A consistent snapshot of one job.
    pub async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let record = self.record(id).await?;
        let job = record.lock().await;
        Ok(job.clone())
    }

    /// Runs `mutator` on the job while holding its lock.
    ///
    /// Finished jobs are frozen: the mutator is not called and
    /// `StoreError::Terminal` is returned instead.
    pub async fn update<F, T>(&self, id: JobId, mutator: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Job) -> T,
    {
        let record = self.record(id).await?;
        let mut job = record.lock().await;
        if job.status.is_terminal() {
            return Err(StoreError::Terminal(id));
        }
        Ok(mutator(&mut job))
    }

    pub async fn apply(&self, id: JobId, update: JobUpdate) -> Result<(), StoreError> {
        self.update(id, |job| job.apply(update)).await?
    }

    /// Removes one record outright, finished or not.
    #[allow(dead_code)] // Store contract; the server only evicts in bulk via `evict_expired`.
    pub async fn delete(&self, id: JobId) -> Option<Job> {
        let record = self.jobs.write().await.remove(&id)?;
        let job = record.lock().await;
        Some(job.clone())
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Removes finished jobs whose terminal transition is older than `ttl`
    /// and returns them so the caller can release their artifacts.
    pub async fn evict_expired(&self, ttl: Duration) -> Vec<Job> {
        let cutoff = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => Utc::now() - ttl,
            Err(_) => return Vec::new(),
        };

        let mut jobs = self.jobs.write().await;
        let mut expired = Vec::new();
        for (id, record) in jobs.iter() {
            // A record being updated right now is by definition not finished.
            let Ok(job) = record.try_lock() else {
                continue;
            };
            if matches!(job.finished_at, Some(done) if done <= cutoff) {
                expired.push(*id);
            }
        }

        let mut evicted = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(record) = jobs.remove(&id) {
                evicted.push(record.lock().await.clone());
            }
        }
        evicted
    }
}
