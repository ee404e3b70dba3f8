use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::job::{Job, JobStatus};
use crate::now_nanos;
use crate::sandbox::executor::ExecuteJob;
use crate::store::JobStore;

/// Attempts per job before giving up on a failing execution.
pub const DEFAULT_RETRIES: u32 = 3;

const QUEUE_TIMEOUT: Duration = Duration::from_secs(1);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Every stride-th loop iteration polls the free queue first, giving the
/// main queue roughly two thirds of the attention without starving free
/// jobs.
const FREE_POLL_STRIDE: u64 = 3;

/// Supervises one worker loop, respawning it if it panics so the pool never
/// shrinks.
pub async fn supervised(
    idx: usize,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn ExecuteJob>,
    token: CancellationToken,
) {
    loop {
        let handle = tokio::spawn(run_loop(
            idx,
            store.clone(),
            executor.clone(),
            token.clone(),
        ));
        match handle.await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                log::error!("worker {idx} panicked, respawning: {e}");
            }
            Err(e) => {
                log::error!("worker {idx} task aborted: {e}");
                break;
            }
        }
        if token.is_cancelled() {
            break;
        }
    }
}

pub async fn run_loop(
    idx: usize,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn ExecuteJob>,
    token: CancellationToken,
) {
    log::info!("worker {idx} initialized");

    let mut iteration: u64 = 0;
    loop {
        let prefer_free = iteration % FREE_POLL_STRIDE == 0;
        // The rotation advances on empty polls too, so an idle stretch
        // cannot pin which queue gets the preference.
        iteration = iteration.wrapping_add(1);

        let popped = tokio::select! {
            _ = token.cancelled() => break,
            res = pop_next(store.as_ref(), prefer_free) => res,
        };

        match popped {
            Ok(Some(mut job)) => {
                log::info!("worker {idx} got job {} from queue", job.id);
                process_job(idx, &mut job, store.as_ref(), executor.as_ref(), &token).await;
            }
            Ok(None) => continue,
            Err(e) => {
                log::error!("worker {idx}: queue error: {e}");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }

    log::info!("worker {idx} has shut down gracefully");
}

/// Polls the free queue first on preferred iterations, falling back to the
/// main queue when it comes up empty.
async fn pop_next(store: &dyn JobStore, prefer_free: bool) -> anyhow::Result<Option<Job>> {
    if prefer_free {
        if let Some(job) = store.pop(true, QUEUE_TIMEOUT).await? {
            return Ok(Some(job));
        }
    }
    store.pop(false, QUEUE_TIMEOUT).await
}

/// Runs one job to a terminal status, retrying executor failures. Store
/// failures are logged but never change the retry decision.
pub async fn process_job(
    idx: usize,
    job: &mut Job,
    store: &dyn JobStore,
    executor: &dyn ExecuteJob,
    token: &CancellationToken,
) {
    for attempt in 1..=DEFAULT_RETRIES {
        job.status = JobStatus::Processing;
        job.started_at = now_nanos();
        if let Err(e) = store.store(job).await {
            log::warn!("worker {idx}: failed to store job {} status: {e}", job.id);
        }

        let exec_result = executor.execute(job, token).await;

        if let Err(e) = store.store(job).await {
            log::warn!("worker {idx}: failed to store job {} result: {e}", job.id);
        }
        executor.cleanup(job.id);

        match exec_result {
            Ok(()) => {
                log::info!("job {} finished on worker {idx}", job.id);
                break;
            }
            Err(e) if attempt >= DEFAULT_RETRIES => {
                log::error!(
                    "worker {idx}: job {} failed after {DEFAULT_RETRIES} attempts: {e}",
                    job.id
                );
                break;
            }
            Err(e) => {
                log::warn!("worker {idx}: retrying job {} after error: {e}", job.id);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
}
