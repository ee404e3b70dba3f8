use crate::job::{JobStatus, RuntimeCode};

/// Maps a sandbox execution report to a terminal verdict.
///
/// The sandbox status codes are: `TO` (wall or CPU limit hit), `SG` (killed
/// by a fatal signal), `RE` (non-zero exit), `XX` (the sandbox itself
/// failed). Anything else means the program ran to completion and the
/// verdict comes from comparing output against the expectation; an empty
/// expectation accepts any output.
pub fn classify(status: &str, exit_code: i32, stdout: &str, expected: &str) -> JobStatus {
    match status {
        "TO" => JobStatus::TimeLimitExceeded,
        "SG" => JobStatus::RuntimeError(runtime_code_for_signal(exit_code)),
        "RE" => JobStatus::RuntimeError(RuntimeCode::Nzec),
        "XX" => JobStatus::InternalError,
        _ => {
            if expected.is_empty() || stdout.trim() == expected.trim() {
                JobStatus::Accepted
            } else {
                JobStatus::WrongAnswer
            }
        }
    }
}

/// Maps the signal number reported in the sandbox exit code to a runtime
/// error classification.
pub fn runtime_code_for_signal(exit_code: i32) -> RuntimeCode {
    match exit_code {
        11 => RuntimeCode::Sigsegv,
        25 => RuntimeCode::Sigxfsz,
        8 => RuntimeCode::Sigfpe,
        6 => RuntimeCode::Sigabrt,
        _ => RuntimeCode::Other,
    }
}
