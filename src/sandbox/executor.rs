use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::buffers;
use crate::job::{Job, JobStatus};
use crate::now_nanos;
use crate::verdict;

use super::meta;
use super::pool::BoxPool;
use super::{CompileOutcome, Sandbox};

/// Per-job box IDs are folded into the tool's accepted ID range.
const BOX_ID_MODULO: u64 = 2_147_483_647;

/// Worker-facing seam for driving one job to a terminal status.
#[async_trait]
pub trait ExecuteJob: Send + Sync {
    /// Drives the job through the sandbox. An `Err` means the infrastructure
    /// failed; the job is left in `InternalError` and the worker may retry.
    /// Verdicts (including compilation errors) return `Ok`.
    async fn execute(&self, job: &mut Job, token: &CancellationToken) -> Result<()>;

    /// Post-job box teardown in per-job mode; a no-op when pooling.
    fn cleanup(&self, job_id: u64);
}

/// Runs jobs in numbered sandbox boxes, either from a bounded reuse pool or
/// with a box initialized per job.
pub struct Executor {
    sandbox: Arc<dyn Sandbox>,
    pool: Option<BoxPool>,
}

impl Executor {
    pub fn new(sandbox: Arc<dyn Sandbox>, use_box_pool: bool, worker_concurrency: usize) -> Self {
        let pool = use_box_pool.then(|| BoxPool::new(pool_size(worker_concurrency)));
        Self { sandbox, pool }
    }

    async fn execute_inner(&self, job: &mut Job, token: &CancellationToken) -> Result<()> {
        // Hold the pool guard for the whole job so the box cannot be handed
        // to another worker mid-run.
        let mut _guard = None;
        let (box_id, box_path) = match &self.pool {
            Some(pool) => {
                let boxed = pool.acquire(self.sandbox.as_ref(), token).await?;
                // The box is reused across jobs; drop the previous job's files.
                self.sandbox.clean_contents(boxed.path())?;
                let id = boxed.id();
                let path = boxed.path().to_path_buf();
                _guard = Some(boxed);
                (id, path)
            }
            None => {
                let box_id = job.id % BOX_ID_MODULO;
                let box_path = self.sandbox.init(box_id).await?;
                (box_id, box_path)
            }
        };

        let paths = self.sandbox.write_inputs(job, &box_path)?;

        if !job.language.compile_cmd.is_empty()
            && self.sandbox.compile(job, box_id, &paths, token).await? == CompileOutcome::Failed
        {
            // A rejected program is a terminal verdict, not a failure.
            job.status = JobStatus::CompilationError;
            job.finished_at = now_nanos();
            return Ok(());
        }

        self.sandbox.run(job, box_id, &paths, token).await?;

        job.output.stdout = buffers::read_file_if_exists(&paths.stdout);
        job.output.stderr = buffers::read_file_if_exists(&paths.stderr);
        if job.language.compile_cmd.is_empty() {
            job.output.compile_output = String::new();
        } else if job.output.compile_output.is_empty() {
            job.output.compile_output = buffers::read_file_if_exists(&paths.compile_output);
        }

        let meta = meta::read_metadata(&paths.metadata)?;
        job.output.time = meta.time;
        job.output.memory = meta.memory;
        job.output.exit_code = meta.exit_code;
        job.output.message = meta.message;

        job.status = verdict::classify(
            &meta.status,
            meta.exit_code,
            &job.output.stdout,
            &job.expected_output,
        );
        job.finished_at = now_nanos();
        Ok(())
    }
}

#[async_trait]
impl ExecuteJob for Executor {
    async fn execute(&self, job: &mut Job, token: &CancellationToken) -> Result<()> {
        let result = self.execute_inner(job, token).await;
        if let Err(e) = &result {
            job.status = JobStatus::InternalError;
            job.output.message = format!("{e:#}");
            job.finished_at = now_nanos();
        }
        result
    }

    fn cleanup(&self, job_id: u64) {
        if self.pool.is_some() {
            return;
        }
        self.sandbox.cleanup(job_id % BOX_ID_MODULO);
    }
}

fn pool_size(worker_concurrency: usize) -> usize {
    (worker_concurrency * 2).max(1)
}
