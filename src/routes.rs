mod batch;
mod jobs;

pub use batch::{get_batch_handler, submit_batch_handler};
pub use jobs::{check_handler, create_job_handler, health_handler};

use actix_web::error::{InternalError, JsonPayloadError, QueryPayloadError};
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

use crate::store::{queue_has_capacity, JobStore};

#[derive(Serialize)]
pub(crate) struct ErrorBody {
    error: String,
}

impl ErrorBody {
    pub(crate) fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorBody::new("invalid request"));
    InternalError::from_response(err, response).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorBody::new("invalid request"));
    InternalError::from_response(err, response).into()
}

/// Queue admission check shared by the submission handlers; enforced per
/// queue, before anything is enqueued.
pub(crate) async fn has_queue_capacity(
    store: &dyn JobStore,
    limit: i64,
    free: bool,
    incoming: i64,
) -> anyhow::Result<bool> {
    if limit <= 0 {
        return Ok(true);
    }
    let length = store.queue_length(free).await?;
    Ok(queue_has_capacity(limit, length, incoming))
}
