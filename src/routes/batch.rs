use actix_web::{get, post, web, HttpResponse, Responder};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::job::{ExecutionSettings, Job, JobStatus, Language};
use crate::store::JobStore;

use super::{has_queue_capacity, ErrorBody};

/// Maps the public numeric language IDs of the compatibility surface to
/// internal language names.
fn language_id_to_name(id: i64) -> Option<&'static str> {
    match id {
        54 | 105 => Some("cpp"),
        62 | 91 => Some("java"),
        71 | 100 => Some("python"),
        63 | 102 => Some("javascript"),
        51 => Some("csharp"),
        60 | 107 => Some("go"),
        _ => None,
    }
}

#[derive(Deserialize)]
pub struct BatchQuery {
    #[serde(default)]
    pub base64_encoded: bool,
}

#[derive(Serialize, Deserialize)]
pub struct BatchSubmission {
    pub source_code: String,
    pub language_id: i64,
    #[serde(default)]
    pub stdin: String,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub cpu_time_limit: f64,
    #[serde(default)]
    pub memory_limit: i64,
    #[serde(default)]
    pub max_processes_and_or_threads: i64,
}

#[derive(Serialize, Deserialize)]
pub struct BatchSubmissionRequest {
    pub submissions: Vec<BatchSubmission>,
    #[serde(default)]
    pub free: bool,
}

#[derive(Serialize, Deserialize)]
pub struct SubmissionToken {
    pub token: String,
}

#[derive(Serialize, Deserialize)]
pub struct BatchStatus {
    pub id: u32,
    pub description: String,
}

fn i64_is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Serialize, Deserialize)]
pub struct SubmissionDetails {
    pub token: String,
    pub status: BatchStatus,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "i64_is_zero")]
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "i64_is_zero")]
    pub finished_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
}

#[derive(Serialize, Deserialize)]
pub struct BatchResponse {
    pub submissions: Vec<SubmissionDetails>,
}

struct PreparedSubmission {
    source_code: String,
    stdin: String,
    expected_output: String,
    language: Language,
    settings: ExecutionSettings,
}

/// Decodes a payload field when the batch is flagged base64-encoded. Empty
/// optional fields pass through untouched.
fn decode_field(encoded: bool, value: &str) -> Result<String, base64::DecodeError> {
    if !encoded || value.is_empty() {
        return Ok(value.to_string());
    }
    let bytes = STANDARD.decode(value)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[post("/submissions/batch")]
pub async fn submit_batch_handler(
    store: web::Data<dyn JobStore>,
    config: web::Data<Config>,
    query: web::Query<BatchQuery>,
    body: web::Json<BatchSubmissionRequest>,
) -> impl Responder {
    let req = body.into_inner();
    if req.submissions.is_empty() {
        return HttpResponse::BadRequest()
            .json(ErrorBody::new("submissions array cannot be empty"));
    }

    match has_queue_capacity(
        store.as_ref(),
        config.queue_length_limit,
        req.free,
        req.submissions.len() as i64,
    )
    .await
    {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::TooManyRequests().json(ErrorBody::new("queue limit reached"))
        }
        Err(e) => {
            log::error!("failed to check queue length: {e}");
            return HttpResponse::InternalServerError()
                .json(ErrorBody::new("failed to check queue length"));
        }
    }

    // Validate and decode the whole batch before enqueueing anything.
    let mut prepared = Vec::with_capacity(req.submissions.len());
    for sub in &req.submissions {
        let Ok(source_code) = decode_field(query.base64_encoded, &sub.source_code) else {
            return HttpResponse::BadRequest().json(ErrorBody::new("invalid base64 source_code"));
        };
        let Ok(stdin) = decode_field(query.base64_encoded, &sub.stdin) else {
            return HttpResponse::BadRequest().json(ErrorBody::new("invalid base64 stdin"));
        };
        let Ok(expected_output) = decode_field(query.base64_encoded, &sub.expected_output) else {
            return HttpResponse::BadRequest()
                .json(ErrorBody::new("invalid base64 expected_output"));
        };

        let Some(name) = language_id_to_name(sub.language_id) else {
            return HttpResponse::BadRequest().json(ErrorBody::new("unsupported language_id"));
        };
        let Some(language) = Language::lookup(name) else {
            return HttpResponse::BadRequest().json(ErrorBody::new("unsupported language"));
        };

        let mut settings = ExecutionSettings::default();
        if sub.cpu_time_limit > 0.0 {
            settings.cpu_time_limit = sub.cpu_time_limit;
        }
        if sub.memory_limit > 0 {
            settings.memory_limit = sub.memory_limit as u64;
        }
        if sub.max_processes_and_or_threads > 0 {
            settings.max_processes = sub.max_processes_and_or_threads as u32;
        }

        prepared.push(PreparedSubmission {
            source_code,
            stdin,
            expected_output,
            language,
            settings,
        });
    }

    let mut tokens = Vec::with_capacity(prepared.len());
    for sub in prepared {
        let job = Job::new(
            sub.source_code,
            sub.stdin,
            sub.expected_output,
            sub.language,
            sub.settings,
        );
        if let Err(e) = store.enqueue(&job, req.free).await {
            log::error!("failed to enqueue job {}: {e}", job.id);
            return HttpResponse::InternalServerError()
                .json(ErrorBody::new("failed to enqueue job"));
        }
        tokens.push(SubmissionToken {
            token: job.id.to_string(),
        });
    }

    HttpResponse::Created().json(tokens)
}

#[derive(Deserialize)]
pub struct BatchTokensQuery {
    #[serde(default)]
    pub tokens: String,
}

#[get("/submissions/batch")]
pub async fn get_batch_handler(
    store: web::Data<dyn JobStore>,
    query: web::Query<BatchTokensQuery>,
) -> impl Responder {
    if query.tokens.is_empty() {
        return HttpResponse::BadRequest().json(ErrorBody::new("tokens parameter is required"));
    }

    let mut job_ids = Vec::new();
    for token in query.tokens.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let Ok(job_id) = token.parse::<u64>() else {
            return HttpResponse::BadRequest().json(ErrorBody::new("invalid token format"));
        };
        job_ids.push(job_id);
    }
    if job_ids.is_empty() {
        return HttpResponse::BadRequest().json(ErrorBody::new("no valid tokens provided"));
    }

    // One batch fetch; an unknown token degrades to an internal-error stub
    // at its position instead of failing the whole reply.
    let jobs = match store.get_many(&job_ids).await {
        Ok(jobs) => jobs,
        Err(e) => {
            log::error!("failed to fetch jobs: {e}");
            return HttpResponse::InternalServerError()
                .json(ErrorBody::new("failed to fetch jobs"));
        }
    };

    let submissions = job_ids
        .iter()
        .zip(jobs)
        .map(|(job_id, job)| submission_details(*job_id, job))
        .collect();

    HttpResponse::Ok().json(BatchResponse { submissions })
}

fn submission_details(job_id: u64, job: Option<Job>) -> SubmissionDetails {
    let Some(job) = job else {
        let status = JobStatus::InternalError;
        return SubmissionDetails {
            token: job_id.to_string(),
            status: BatchStatus {
                id: status.id(),
                description: status.description(),
            },
            created_at: 0,
            started_at: 0,
            finished_at: 0,
            stdout: None,
            stderr: None,
            compile_output: None,
            message: None,
            time: None,
            memory: None,
        };
    };

    SubmissionDetails {
        token: job.id.to_string(),
        status: BatchStatus {
            id: job.status.id(),
            description: job.status.description(),
        },
        created_at: job.created_at,
        started_at: job.started_at,
        finished_at: job.finished_at,
        stdout: non_empty(job.output.stdout),
        stderr: non_empty(job.output.stderr),
        compile_output: non_empty(job.output.compile_output),
        message: non_empty(job.output.message),
        time: (job.output.time > 0.0).then(|| job.output.time.to_string()),
        memory: (job.output.memory > 0).then_some(job.output.memory),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
