//! Background jobs.
//!
//! An in-process worker pool with at-least-once semantics. Handlers
//! enqueue work and move on; workers retry failed jobs with a
//! per-kind back-off schedule before giving up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::instrument;

use crate::error::{ServerError, ServerResult};
use crate::{imports, variants, State};

/// A unit of background work.
#[derive(Debug, Clone)]
pub enum Job {
    /// Generate resized variants for a completed upload.
    GenerateVariants { upload_id: String },

    /// Download a remote image, ingest it, and attach it to a
    /// product as the primary image.
    FetchRemoteImage { product_id: i64, source: String },
}

impl Job {
    fn kind(&self) -> &'static str {
        match self {
            Self::GenerateVariants { .. } => "generate-variants",
            Self::FetchRemoteImage { .. } => "fetch-remote-image",
        }
    }

    /// Number of delivery attempts before the job is dropped.
    fn tries(&self) -> u32 {
        3
    }

    /// Delay before the given retry (1-based attempt that just failed).
    fn backoff(&self, attempt: u32) -> Duration {
        match self {
            // Linear, growing with the attempt count
            Self::GenerateVariants { .. } => Duration::from_secs(30 * attempt as u64),

            Self::FetchRemoteImage { .. } => match attempt {
                1 => Duration::from_secs(60),
                2 => Duration::from_secs(300),
                _ => Duration::from_secs(900),
            },
        }
    }
}

/// Handle for enqueueing jobs.
#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobSender {
    pub fn enqueue(&self, job: Job) -> ServerResult<()> {
        self.tx
            .send(job)
            .map_err(|_| ServerError::InternalServerError)
    }
}

/// Spawns the worker pool and returns the enqueue handle.
pub fn spawn(state: State, workers: usize) -> (JobSender, Vec<JoinHandle<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let rx = Arc::new(Mutex::new(rx));

    let handles = (0..workers.max(1))
        .map(|worker| {
            let state = state.clone();
            let rx = rx.clone();

            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };

                    match job {
                        Some(job) => run_with_retries(&state, job, worker).await,
                        None => break,
                    }
                }
            })
        })
        .collect();

    (JobSender { tx }, handles)
}

#[instrument(skip_all, fields(kind = job.kind(), worker))]
async fn run_with_retries(state: &State, job: Job, worker: usize) {
    let tries = job.tries();

    for attempt in 1..=tries {
        match run_job(state, &job).await {
            Ok(()) => {
                tracing::debug!(attempt, "Job finished");
                return;
            }
            Err(e) if !is_retryable(&e) => {
                tracing::warn!(attempt, "Job failed permanently: {}", e);
                return;
            }
            Err(e) if attempt < tries => {
                let delay = job.backoff(attempt);
                tracing::warn!(
                    attempt,
                    delay_secs = delay.as_secs(),
                    "Job failed, will retry: {}",
                    e
                );
                time::sleep(delay).await;
            }
            Err(e) => {
                tracing::warn!(attempt, "Job failed, giving up: {}", e);
            }
        }
    }
}

async fn run_job(state: &State, job: &Job) -> ServerResult<()> {
    match job {
        Job::GenerateVariants { upload_id } => {
            variants::generate_variants(state, upload_id).await?;
            Ok(())
        }
        Job::FetchRemoteImage { product_id, source } => {
            imports::resolve::fetch_and_attach(state, *product_id, source).await
        }
    }
}

/// Bad input never becomes good by waiting.
fn is_retryable(error: &ServerError) -> bool {
    !matches!(
        error,
        ServerError::NoSuchUpload
            | ServerError::NoSuchProduct
            | ServerError::Validation { .. }
            | ServerError::StateConflict { .. }
            | ServerError::ChecksumMismatch { .. }
    )
}
