pub mod executor;
pub mod isolate;
pub mod meta;
pub mod pool;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::job::Job;

/// Canonical file locations inside a box for one job execution.
#[derive(Debug, Clone)]
pub struct BoxPaths {
    /// `<box root>/box`, the directory visible to the sandboxed process.
    pub box_dir: PathBuf,
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub metadata: PathBuf,
    pub compile_output: PathBuf,
}

impl BoxPaths {
    pub fn new(box_path: &Path) -> Self {
        let box_dir = box_path.join("box");
        Self {
            stdin: box_dir.join("stdin"),
            stdout: box_dir.join("stdout"),
            stderr: box_dir.join("stderr"),
            metadata: box_dir.join("metadata"),
            compile_output: box_dir.join("compile_output"),
            box_dir,
        }
    }
}

/// Outcome of the compile stage. A failed compilation is a verdict, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileOutcome {
    Succeeded,
    Failed,
}

/// Backend seam for the isolation tool driving one numbered box.
///
/// The production implementation shells out to `isolate`; tests substitute
/// scripted fakes.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Creates (or re-creates) the box and returns its root path.
    async fn init(&self, box_id: u64) -> Result<PathBuf>;

    /// Best-effort asynchronous teardown of the box.
    fn cleanup(&self, box_id: u64);

    /// Empties `<box root>/box` while keeping the box itself, so a pooled
    /// box can host the next job.
    fn clean_contents(&self, box_path: &Path) -> Result<()>;

    /// Stages the source file and stdin, returning the canonical paths.
    fn write_inputs(&self, job: &Job, box_path: &Path) -> Result<BoxPaths>;

    /// Runs the language's compile command. Returns `Failed` (with
    /// `compile_output` and `message` populated on the job) when the
    /// compiler rejects the program.
    async fn compile(
        &self,
        job: &mut Job,
        box_id: u64,
        paths: &BoxPaths,
        token: &CancellationToken,
    ) -> Result<CompileOutcome>;

    /// Runs the program. A misbehaving program is not an error here; the
    /// metadata file carries the authoritative report.
    async fn run(
        &self,
        job: &Job,
        box_id: u64,
        paths: &BoxPaths,
        token: &CancellationToken,
    ) -> Result<()>;
}

/// Whether the host exposes cgroup controls, detected once per process.
pub fn cgroup_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| Path::new("/sys/fs/cgroup").exists())
}
