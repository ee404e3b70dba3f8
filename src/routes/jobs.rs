use actix_web::{get, post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::job::{ExecutionSettings, Job, Language};
use crate::store::JobStore;

use super::{has_queue_capacity, ErrorBody};

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateJobRequest {
    pub code: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected: String,
    pub language: String,
    #[serde(default)]
    pub time_limit: Option<f64>,
    #[serde(default)]
    pub memory_limit: Option<u64>,
    #[serde(default)]
    pub stack_limit: Option<u64>,
    #[serde(default)]
    pub free: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateJobResponse {
    pub status: String,
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CheckStatus {
    pub id: u32,
    pub description: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CheckResponse {
    pub created_at: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub stdout: String,
    pub time: f64,
    pub memory: u64,
    pub stderr: String,
    pub token: u64,
    pub compile_output: String,
    pub message: String,
    pub status: CheckStatus,
}

#[post("/create")]
pub async fn create_job_handler(
    store: web::Data<dyn JobStore>,
    config: web::Data<Config>,
    body: web::Json<CreateJobRequest>,
) -> impl Responder {
    let body = body.into_inner();

    match has_queue_capacity(store.as_ref(), config.queue_length_limit, body.free, 1).await {
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

    let Some(language) = Language::lookup(&body.language) else {
        return HttpResponse::BadRequest().json(ErrorBody::new("unsupported language"));
    };

    let mut settings = ExecutionSettings::default();
    if let Some(limit) = body.time_limit {
        settings.cpu_time_limit = limit;
    }
    if let Some(limit) = body.memory_limit {
        settings.memory_limit = limit;
    }
    if let Some(limit) = body.stack_limit {
        settings.stack_limit = limit;
    }

    let job = Job::new(body.code, body.input, body.expected, language, settings);

    if let Err(e) = store.enqueue(&job, body.free).await {
        log::error!("failed to enqueue job {}: {e}", job.id);
        return HttpResponse::InternalServerError().json(ErrorBody::new("failed to enqueue job"));
    }

    log::info!("job {} submitted", job.id);
    HttpResponse::Ok().json(CreateJobResponse {
        status: "created".to_string(),
        id: job.id.to_string(),
    })
}

#[get("/check/{job_id}")]
pub async fn check_handler(
    store: web::Data<dyn JobStore>,
    path: web::Path<String>,
) -> impl Responder {
    let Ok(job_id) = path.into_inner().parse::<u64>() else {
        return HttpResponse::BadRequest().json(ErrorBody::new("invalid job id"));
    };

    match store.get(job_id).await {
        Ok(Some(job)) => HttpResponse::Ok().json(CheckResponse {
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            stdout: job.output.stdout,
            time: job.output.time,
            memory: job.output.memory,
            stderr: job.output.stderr,
            token: job.id,
            compile_output: job.output.compile_output,
            message: job.output.message,
            status: CheckStatus {
                id: job.status.id(),
                description: job.status.description(),
            },
        }),
        Ok(None) => HttpResponse::NotFound().json(ErrorBody::new("job not found")),
        Err(e) => {
            log::error!("failed to fetch job {job_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorBody::new("failed to fetch job"))
        }
    }
}

#[get("/health")]
pub async fn health_handler(
    store: web::Data<dyn JobStore>,
    config: web::Data<Config>,
) -> impl Responder {
    let queue_length = match store.queue_length(false).await {
        Ok(length) => length,
        Err(e) => {
            log::error!("health check failed to read queue length: {e}");
            return HttpResponse::ServiceUnavailable().json(json!({
                "status": "error",
                "error": "failed to check queue length",
            }));
        }
    };
    let free_queue_length = match store.queue_length(true).await {
        Ok(length) => length,
        Err(e) => {
            log::error!("health check failed to read free queue length: {e}");
            return HttpResponse::ServiceUnavailable().json(json!({
                "status": "error",
                "error": "failed to check free queue length",
            }));
        }
    };

    let mut response = json!({
        "status": "ok",
        "queued_jobs": queue_length,
        "queue_limit": config.queue_length_limit,
        "worker_concurrency": config.worker_concurrency(),
        "box_pool": config.use_box_pool,
        "free_queued_jobs": free_queue_length,
        "free_queue_limit": config.queue_length_limit,
    });
    if config.queue_length_limit > 0 {
        response["queue_available"] = json!(config.queue_length_limit - queue_length);
        response["queue_utilization"] =
            json!(queue_length as f64 / config.queue_length_limit as f64);
    }

    HttpResponse::Ok().json(response)
}
