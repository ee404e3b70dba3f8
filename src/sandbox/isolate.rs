use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::buffers;
use crate::job::{ExecutionSettings, Job};

use super::{cgroup_supported, BoxPaths, CompileOutcome, Sandbox};

const ISOLATE: &str = "isolate";

// Environment pinned inside the box.
const SANDBOX_PATH: &str =
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const SANDBOX_HOME: &str = "HOME=/tmp";

/// Driver for the `isolate` sandbox tool. Stateless; every call names the
/// box it operates on and all per-job state lives in the box filesystem.
pub struct IsolateSandbox {
    use_cgroup: bool,
}

impl IsolateSandbox {
    pub fn new() -> Self {
        Self {
            use_cgroup: cgroup_supported(),
        }
    }
}

impl Default for IsolateSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for IsolateSandbox {
    async fn init(&self, box_id: u64) -> Result<PathBuf> {
        let mut args: Vec<String> = Vec::new();
        if self.use_cgroup {
            args.push("--cg".to_string());
        }
        args.extend(["-b".to_string(), box_id.to_string(), "--init".to_string()]);

        let output = Command::new(ISOLATE)
            .args(&args)
            .output()
            .await
            .context("failed to spawn isolate --init")?;
        if !output.status.success() {
            bail!(
                "isolate --init exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let box_path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if box_path.is_empty() {
            bail!("isolate --init produced empty stdout");
        }
        Ok(PathBuf::from(box_path))
    }

    fn cleanup(&self, box_id: u64) {
        let mut args: Vec<String> = Vec::new();
        if self.use_cgroup {
            args.push("--cg".to_string());
        }
        args.extend(["-b".to_string(), box_id.to_string(), "--cleanup".to_string()]);

        tokio::spawn(async move {
            match Command::new(ISOLATE).args(&args).output().await {
                Ok(output) if output.status.success() => {
                    log::debug!("box {box_id} cleaned up");
                }
                Ok(output) => {
                    log::error!("isolate --cleanup for box {box_id} exited with {}", output.status);
                }
                Err(e) => {
                    log::error!("isolate --cleanup for box {box_id} failed to spawn: {e}");
                }
            }
        });
    }

    fn clean_contents(&self, box_path: &Path) -> Result<()> {
        let box_dir = box_path.join("box");
        if !box_dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&box_dir).context("read box directory")? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)
                    .with_context(|| format!("remove {}", path.display()))?;
            } else {
                fs::remove_file(&path)
                    .with_context(|| format!("remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    fn write_inputs(&self, job: &Job, box_path: &Path) -> Result<BoxPaths> {
        let paths = BoxPaths::new(box_path);
        fs::write(paths.box_dir.join(&job.language.source_file), &job.source_code)
            .context("write source")?;
        fs::write(&paths.stdin, &job.stdin).context("write stdin")?;
        Ok(paths)
    }

    async fn compile(
        &self,
        job: &mut Job,
        box_id: u64,
        paths: &BoxPaths,
        token: &CancellationToken,
    ) -> Result<CompileOutcome> {
        let shell_cmd = shell_redirected(&job.language.compile_cmd, "2> /box/compile_output")?;
        let args = compile_args(&job.settings, box_id, &paths.metadata, self.use_cgroup, &shell_cmd);
        let output = invoke_isolate(args, None, token).await?;

        let mut compile_output = buffers::read_file_if_exists(&paths.compile_output);
        if output.status.success() {
            job.output.compile_output = compile_output;
            return Ok(CompileOutcome::Succeeded);
        }

        // The compiler's own diagnostics win; the tool's combined output is
        // the fallback when the redirect file is empty.
        if compile_output.is_empty() {
            let mut combined = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if !stderr.is_empty() {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(stderr);
            }
            compile_output = combined;
        }
        job.output.compile_output = compile_output;
        job.output.message = if job.output.compile_output.is_empty() {
            "Compilation failed".to_string()
        } else {
            job.output.compile_output.clone()
        };
        Ok(CompileOutcome::Failed)
    }

    async fn run(
        &self,
        job: &Job,
        box_id: u64,
        paths: &BoxPaths,
        token: &CancellationToken,
    ) -> Result<()> {
        let shell_cmd = shell_redirected(&job.language.run_cmd, "> /box/stdout 2> /box/stderr")?;
        let args = run_args(&job.settings, box_id, &paths.metadata, self.use_cgroup, &shell_cmd);
        let stdin = fs::File::open(&paths.stdin).context("open stdin")?;
        // A non-zero exit from the tool means the submitted program
        // misbehaved; the metadata file carries the authoritative report.
        invoke_isolate(args, Some(stdin), token).await?;
        Ok(())
    }
}

/// Spawns the tool and waits for it, killing the child if shutdown is
/// signalled first. Only a spawn failure is an error.
async fn invoke_isolate(
    args: Vec<String>,
    stdin: Option<fs::File>,
    token: &CancellationToken,
) -> Result<std::process::Output> {
    let mut cmd = Command::new(ISOLATE);
    cmd.args(&args).kill_on_drop(true);
    match stdin {
        Some(file) => cmd.stdin(Stdio::from(file)),
        None => cmd.stdin(Stdio::null()),
    };
    tokio::select! {
        _ = token.cancelled() => bail!("sandbox invocation aborted by shutdown"),
        output = cmd.output() => output.context("failed to spawn isolate"),
    }
}

/// Collapses the command's whitespace and appends the shell redirection that
/// routes output to the canonical in-box files.
fn shell_redirected(cmd: &str, redirect: &str) -> Result<String> {
    let parts: Vec<&str> = cmd.split_whitespace().collect();
    if parts.is_empty() {
        bail!("command is empty");
    }
    Ok(format!("{} {}", parts.join(" "), redirect))
}

fn compile_args(
    settings: &ExecutionSettings,
    box_id: u64,
    metadata: &Path,
    use_cgroup: bool,
    shell_cmd: &str,
) -> Vec<String> {
    let mut args = Vec::with_capacity(30);
    if use_cgroup {
        args.push("--cg".to_string());
    }
    args.extend([
        "-s".to_string(),
        "-b".to_string(),
        box_id.to_string(),
        "-M".to_string(),
        metadata.to_string_lossy().into_owned(),
        "--stderr-to-stdout".to_string(),
        "-i".to_string(),
        "/dev/null".to_string(),
    ]);
    args.extend(limit_args(settings));
    args.extend(env_and_dir_args());
    args.extend(memory_flags(settings, use_cgroup));
    args.extend(run_tail(shell_cmd));
    args
}

fn run_args(
    settings: &ExecutionSettings,
    box_id: u64,
    metadata: &Path,
    use_cgroup: bool,
    shell_cmd: &str,
) -> Vec<String> {
    let mut args = Vec::with_capacity(30);
    if use_cgroup {
        args.push("--cg".to_string());
    }
    args.extend([
        "-s".to_string(),
        "-b".to_string(),
        box_id.to_string(),
        "-M".to_string(),
        metadata.to_string_lossy().into_owned(),
    ]);
    if settings.redirect_stderr_to_stdout {
        args.push("--stderr-to-stdout".to_string());
    }
    if settings.enable_network {
        args.push("--share-net".to_string());
    }
    args.extend(limit_args(settings));
    args.extend(env_and_dir_args());
    args.extend(memory_flags(settings, use_cgroup));
    args.extend(run_tail(shell_cmd));
    args
}

fn limit_args(settings: &ExecutionSettings) -> Vec<String> {
    vec![
        format!("--process={}", settings.max_processes),
        "-t".to_string(),
        settings.cpu_time_limit.to_string(),
        "-x".to_string(),
        "0".to_string(),
        "-w".to_string(),
        settings.wall_time_limit.to_string(),
        "-k".to_string(),
        settings.stack_limit.to_string(),
        "-f".to_string(),
        settings.max_file_size.to_string(),
    ]
}

fn env_and_dir_args() -> Vec<String> {
    vec![
        "-E".to_string(),
        SANDBOX_PATH.to_string(),
        "-E".to_string(),
        SANDBOX_HOME.to_string(),
        "-d".to_string(),
        "/etc:noexec".to_string(),
    ]
}

/// Per-process `-m` when cgroups are unavailable or the job opts into
/// per-process accounting, cgroup-wide `--cg-mem` otherwise. Both in KiB.
fn memory_flags(settings: &ExecutionSettings, use_cgroup: bool) -> Vec<String> {
    if !use_cgroup || settings.enable_per_process_and_thread_memory_limit {
        vec!["-m".to_string(), settings.memory_limit.to_string()]
    } else {
        vec![format!("--cg-mem={}", settings.memory_limit)]
    }
}

fn run_tail(shell_cmd: &str) -> Vec<String> {
    vec![
        "--run".to_string(),
        "--".to_string(),
        "/usr/bin/sh".to_string(),
        "-c".to_string(),
        shell_cmd.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ExecutionSettings {
        ExecutionSettings::default()
    }

    #[test]
    fn test_shell_redirected() {
        assert_eq!(
            shell_redirected("/usr/bin/python3  main.py", "> /box/stdout 2> /box/stderr").unwrap(),
            "/usr/bin/python3 main.py > /box/stdout 2> /box/stderr"
        );
        assert_eq!(
            shell_redirected("/usr/bin/javac Main.java", "2> /box/compile_output").unwrap(),
            "/usr/bin/javac Main.java 2> /box/compile_output"
        );
        assert!(shell_redirected("   ", "2> /box/compile_output").is_err());
    }

    #[test]
    fn test_compile_args_layout_with_cgroup() {
        let args = compile_args(&settings(), 7, Path::new("/box/7/box/metadata"), true, "cc x.c 2> /box/compile_output");
        let expected = [
            "--cg",
            "-s",
            "-b",
            "7",
            "-M",
            "/box/7/box/metadata",
            "--stderr-to-stdout",
            "-i",
            "/dev/null",
            "--process=60",
            "-t",
            "5",
            "-x",
            "0",
            "-w",
            "10",
            "-k",
            "64000",
            "-f",
            "1024",
            "-E",
            SANDBOX_PATH,
            "-E",
            "HOME=/tmp",
            "-d",
            "/etc:noexec",
            "--cg-mem=128000",
            "--run",
            "--",
            "/usr/bin/sh",
            "-c",
            "cc x.c 2> /box/compile_output",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn test_run_args_honor_job_toggles() {
        let mut s = settings();
        s.redirect_stderr_to_stdout = true;
        s.enable_network = true;
        let args = run_args(&s, 3, Path::new("/m"), true, "./a.out > /box/stdout 2> /box/stderr");
        assert!(args.contains(&"--stderr-to-stdout".to_string()));
        assert!(args.contains(&"--share-net".to_string()));

        let s = settings();
        let args = run_args(&s, 3, Path::new("/m"), true, "./a.out > /box/stdout 2> /box/stderr");
        assert!(!args.contains(&"--stderr-to-stdout".to_string()));
        assert!(!args.contains(&"--share-net".to_string()));
    }

    #[test]
    fn test_memory_flag_selection() {
        let s = settings();
        assert_eq!(memory_flags(&s, true), vec!["--cg-mem=128000"]);
        assert_eq!(memory_flags(&s, false), vec!["-m", "128000"]);

        let mut s = settings();
        s.enable_per_process_and_thread_memory_limit = true;
        assert_eq!(memory_flags(&s, true), vec!["-m", "128000"]);
    }

    #[test]
    fn test_limit_floats_render_shortest() {
        let mut s = settings();
        s.cpu_time_limit = 1.5;
        let args = limit_args(&s);
        assert!(args.contains(&"1.5".to_string()));
        // Whole seconds render without a trailing ".0" fraction.
        assert!(args.contains(&"10".to_string()));
    }

    #[test]
    fn test_no_cgroup_drops_cg_flag() {
        let args = run_args(&settings(), 1, Path::new("/m"), false, "true");
        assert_ne!(args[0], "--cg");
        assert!(args.contains(&"-m".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--cg-mem")));
    }
}
