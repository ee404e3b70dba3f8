use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::now_nanos;

/// Fatal-signal classification attached to a runtime error verdict. The
/// numeric exit codes reported by the sandbox map onto these via
/// [`crate::verdict::runtime_code_for_signal`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeCode {
    #[serde(rename = "SIGSEGV")]
    Sigsegv,
    #[serde(rename = "SIGXFSZ")]
    Sigxfsz,
    #[serde(rename = "SIGFPE")]
    Sigfpe,
    #[serde(rename = "SIGABRT")]
    Sigabrt,
    #[serde(rename = "NZEC")]
    Nzec,
    Other,
}

impl RuntimeCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sigsegv => "SIGSEGV",
            Self::Sigxfsz => "SIGXFSZ",
            Self::Sigfpe => "SIGFPE",
            Self::Sigabrt => "SIGABRT",
            Self::Nzec => "NZEC",
            Self::Other => "Other",
        }
    }
}

/// Current state of a job. A job moves `Queued -> Processing -> terminal`;
/// terminal states are only ever replaced by a worker retry resetting the
/// job to `Processing`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", content = "runtime_code")]
pub enum JobStatus {
    Queued,
    Processing,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    CompilationError,
    RuntimeError(RuntimeCode),
    InternalError,
    ExecFormatError,
}

impl JobStatus {
    /// Numeric status ID; part of the frozen external contract.
    pub fn id(&self) -> u32 {
        match self {
            Self::Queued => 1,
            Self::Processing => 2,
            Self::Accepted => 3,
            Self::WrongAnswer => 4,
            Self::TimeLimitExceeded => 5,
            Self::CompilationError => 6,
            Self::RuntimeError(code) => match code {
                RuntimeCode::Sigsegv => 7,
                RuntimeCode::Sigxfsz => 8,
                RuntimeCode::Sigfpe => 9,
                RuntimeCode::Sigabrt => 10,
                RuntimeCode::Nzec => 11,
                RuntimeCode::Other => 12,
            },
            Self::InternalError => 13,
            Self::ExecFormatError => 14,
        }
    }

    /// Human-readable status description; part of the frozen external
    /// contract.
    pub fn description(&self) -> String {
        match self {
            Self::Queued => "In Queue".to_string(),
            Self::Processing => "Processing".to_string(),
            Self::Accepted => "Accepted".to_string(),
            Self::WrongAnswer => "Wrong Answer".to_string(),
            Self::TimeLimitExceeded => "Time Limit Exceeded".to_string(),
            Self::CompilationError => "Compilation Error".to_string(),
            Self::RuntimeError(code) => format!("Runtime Error: ({})", code.as_str()),
            Self::InternalError => "Internal Error".to_string(),
            Self::ExecFormatError => "Exec Format Error".to_string(),
        }
    }
}

/// Program output and execution metadata collected from the sandbox.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct JobOutput {
    pub stdout: String,
    pub stderr: String,
    pub compile_output: String,
    /// CPU time in seconds as reported by the sandbox.
    pub time: f64,
    /// Peak memory in KiB; the max of every RSS metric the sandbox reports.
    pub memory: u64,
    pub exit_code: i32,
    pub message: String,
}

/// How to compile and run a submission.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Language {
    pub name: String,
    pub source_file: String,
    /// Empty for interpreted languages.
    pub compile_cmd: String,
    pub run_cmd: String,
    pub is_compiled: bool,
}

impl Language {
    /// Static registry keyed by internal name. Unknown names are rejected at
    /// the API boundary.
    pub fn lookup(name: &str) -> Option<Language> {
        match name {
            "python" => Some(Language {
                name: "python".to_string(),
                source_file: "main.py".to_string(),
                compile_cmd: String::new(),
                run_cmd: "/usr/bin/python3 main.py".to_string(),
                is_compiled: false,
            }),
            "cpp" => Some(Language {
                name: "cpp".to_string(),
                source_file: "main.cpp".to_string(),
                compile_cmd:
                    "/usr/bin/g++ -O0 -Wall -Wextra -Werror -Wpedantic -Wfatal-errors main.cpp"
                        .to_string(),
                run_cmd: "./a.out".to_string(),
                is_compiled: true,
            }),
            "javascript" => Some(Language {
                name: "javascript".to_string(),
                source_file: "main.js".to_string(),
                compile_cmd: String::new(),
                run_cmd: "/usr/bin/node main.js".to_string(),
                is_compiled: false,
            }),
            "java" => Some(Language {
                name: "java".to_string(),
                source_file: "Main.java".to_string(),
                compile_cmd: "/usr/bin/javac Main.java".to_string(),
                run_cmd: "/usr/bin/java Main".to_string(),
                is_compiled: false,
            }),
            _ => None,
        }
    }
}

/// Resource limits applied to one job. Time limits are seconds; sizes are
/// KiB.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ExecutionSettings {
    pub cpu_time_limit: f64,
    pub wall_time_limit: f64,
    pub memory_limit: u64,
    pub stack_limit: u64,
    pub max_processes: u32,
    pub max_file_size: u64,
    pub enable_network: bool,
    pub redirect_stderr_to_stdout: bool,
    pub enable_per_process_and_thread_memory_limit: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            cpu_time_limit: 5.0,
            wall_time_limit: 10.0,
            memory_limit: 128_000,
            stack_limit: 64_000,
            max_processes: 60,
            max_file_size: 1024,
            enable_network: false,
            redirect_stderr_to_stdout: false,
            enable_per_process_and_thread_memory_limit: false,
        }
    }
}

/// A unit of work: one submission travelling from the queue through the
/// sandbox to a terminal verdict.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Job {
    pub id: u64,
    pub source_code: String,
    pub language: Language,
    #[serde(default)]
    pub stdin: String,
    #[serde(default)]
    pub expected_output: String,
    pub settings: ExecutionSettings,
    pub status: JobStatus,
    pub created_at: i64,
    #[serde(default)]
    pub started_at: i64,
    #[serde(default)]
    pub finished_at: i64,
    #[serde(default)]
    pub output: JobOutput,
}

impl Job {
    /// Constructs a queued job with a fresh random ID and a creation
    /// timestamp.
    pub fn new(
        source_code: String,
        stdin: String,
        expected_output: String,
        language: Language,
        settings: ExecutionSettings,
    ) -> Job {
        Job {
            id: new_job_id(),
            source_code,
            language,
            stdin,
            expected_output,
            settings,
            status: JobStatus::Queued,
            created_at: now_nanos(),
            started_at: 0,
            finished_at: 0,
            output: JobOutput::default(),
        }
    }
}

/// Random non-zero 64-bit job ID from OS entropy, falling back to wall-clock
/// nanoseconds if entropy is unavailable.
pub fn new_job_id() -> u64 {
    let mut buf = [0u8; 8];
    if OsRng.try_fill_bytes(&mut buf).is_ok() {
        let id = u64::from_le_bytes(buf);
        if id != 0 {
            return id;
        }
    }
    now_nanos() as u64
}
