mod common;

use std::sync::Arc;

use actix_web::{test, web, App};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;

use bolt::config::Config;
use bolt::job::JobStatus;
use bolt::routes::{
    check_handler, create_job_handler, get_batch_handler, health_handler, json_error_handler,
    submit_batch_handler,
};
use bolt::store::JobStore;

use common::{make_job, MemoryStore};

fn test_config(queue_length_limit: i64) -> Config {
    Config {
        redis_url: String::new(),
        port: 0,
        use_box_pool: true,
        queue_length_limit,
        worker_multiplier: 1,
    }
}

macro_rules! test_app {
    ($store:expr, $limit:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::from($store.clone() as Arc<dyn JobStore>))
                .app_data(web::Data::new(test_config($limit)))
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .service(create_job_handler)
                .service(check_handler)
                .service(health_handler)
                .service(submit_batch_handler)
                .service(get_batch_handler),
        )
        .await
    };
}

#[actix_web::test]
async fn test_create_enqueues_a_queued_job() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let req = test::TestRequest::post()
        .uri("/create")
        .set_json(json!({
            "code": "print('Hello from batch')",
            "input": "",
            "expected": "Hello from batch",
            "language": "python",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "created");
    let job_id: u64 = body["id"].as_str().unwrap().parse().unwrap();

    let job = store.stored_job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.expected_output, "Hello from batch");
    assert!(job.created_at > 0);
    assert_eq!(store.queue_length(false).await.unwrap(), 1);
    assert_eq!(store.queue_length(true).await.unwrap(), 0);
}

#[actix_web::test]
async fn test_create_with_free_flag_uses_free_queue() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let req = test::TestRequest::post()
        .uri("/create")
        .set_json(json!({
            "code": "print(1)",
            "language": "python",
            "free": true,
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    assert_eq!(store.queue_length(false).await.unwrap(), 0);
    assert_eq!(store.queue_length(true).await.unwrap(), 1);
}

#[actix_web::test]
async fn test_create_with_limit_overrides() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let req = test::TestRequest::post()
        .uri("/create")
        .set_json(json!({
            "code": "while True: pass",
            "language": "python",
            "time_limit": 1.0,
            "memory_limit": 64000,
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let job_id: u64 = body["id"].as_str().unwrap().parse().unwrap();
    let job = store.stored_job(job_id).unwrap();
    assert_eq!(job.settings.cpu_time_limit, 1.0);
    assert_eq!(job.settings.memory_limit, 64000);
    // Untouched limits keep their defaults.
    assert_eq!(job.settings.stack_limit, 64_000);
}

#[actix_web::test]
async fn test_unknown_language_is_rejected_and_nothing_enqueued() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let req = test::TestRequest::post()
        .uri("/create")
        .set_json(json!({
            "code": "print(1)",
            "language": "cobol",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unsupported language");
    assert_eq!(store.queue_length(false).await.unwrap(), 0);
}

#[actix_web::test]
async fn test_check_returns_job_details() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let job = make_job("print('hi')", "");
    store.enqueue(&job, false).await.unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/check/{}", job.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["token"], job.id);
    assert_eq!(body["status"]["id"], 1);
    assert_eq!(body["status"]["description"], "In Queue");
    assert_eq!(body["created_at"], job.created_at);
    assert_eq!(body["started_at"], 0);
}

#[actix_web::test]
async fn test_check_unknown_job_is_404() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let req = test::TestRequest::get().uri("/check/12345").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::get().uri("/check/not-a-number").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_health_reports_queue_state() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 100);

    store.enqueue(&make_job("print(1)", ""), false).await.unwrap();
    store.enqueue(&make_job("print(2)", ""), true).await.unwrap();

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["queued_jobs"], 1);
    assert_eq!(body["free_queued_jobs"], 1);
    assert_eq!(body["queue_limit"], 100);
    assert_eq!(body["box_pool"], true);
    assert_eq!(body["queue_available"], 99);
}

#[actix_web::test]
async fn test_batch_submit_decodes_base64() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let source = STANDARD.encode("print('Hello from batch')");
    let expected = STANDARD.encode("Hello from batch");
    let req = test::TestRequest::post()
        .uri("/submissions/batch?base64_encoded=true")
        .set_json(json!({
            "submissions": [
                {"source_code": source, "language_id": 71, "expected_output": expected},
                {"source_code": STANDARD.encode("print(2)"), "language_id": 100},
            ],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let tokens = body.as_array().unwrap();
    assert_eq!(tokens.len(), 2);

    let job_id: u64 = tokens[0]["token"].as_str().unwrap().parse().unwrap();
    let job = store.stored_job(job_id).unwrap();
    assert_eq!(job.source_code, "print('Hello from batch')");
    assert_eq!(job.expected_output, "Hello from batch");
    assert_eq!(job.language.name, "python");
    assert_eq!(store.queue_length(false).await.unwrap(), 2);
}

#[actix_web::test]
async fn test_batch_submit_rejects_unknown_language_id() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let req = test::TestRequest::post()
        .uri("/submissions/batch")
        .set_json(json!({
            "submissions": [
                {"source_code": "print(1)", "language_id": 71},
                {"source_code": "print(2)", "language_id": 999},
            ],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unsupported language_id");
    // The whole batch is validated before anything is enqueued.
    assert_eq!(store.queue_length(false).await.unwrap(), 0);
}

#[actix_web::test]
async fn test_batch_admission_control() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 2);

    store.enqueue(&make_job("print(0)", ""), false).await.unwrap();

    // One slot left: a batch of two is refused.
    let req = test::TestRequest::post()
        .uri("/submissions/batch")
        .set_json(json!({
            "submissions": [
                {"source_code": "print(1)", "language_id": 71},
                {"source_code": "print(2)", "language_id": 71},
            ],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);
    assert_eq!(store.queue_length(false).await.unwrap(), 1);

    // A batch of one still fits.
    let req = test::TestRequest::post()
        .uri("/submissions/batch")
        .set_json(json!({
            "submissions": [
                {"source_code": "print(1)", "language_id": 71},
            ],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    assert_eq!(store.queue_length(false).await.unwrap(), 2);
}

#[actix_web::test]
async fn test_batch_get_preserves_order_and_stubs_unknown_tokens() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let mut accepted = make_job("print('hi')", "");
    accepted.status = JobStatus::Accepted;
    accepted.output.stdout = "hi\n".to_string();
    accepted.output.time = 0.02;
    accepted.output.memory = 2048;
    store.store(&accepted).await.unwrap();

    let queued = make_job("print('later')", "");
    store.store(&queued).await.unwrap();

    let req = test::TestRequest::get()
        .uri(&format!(
            "/submissions/batch?tokens={},{},{}",
            accepted.id, 424242, queued.id
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let submissions = body["submissions"].as_array().unwrap();
    assert_eq!(submissions.len(), 3);

    assert_eq!(submissions[0]["token"], accepted.id.to_string());
    assert_eq!(submissions[0]["status"]["id"], 3);
    assert_eq!(submissions[0]["stdout"], "hi\n");
    assert_eq!(submissions[0]["memory"], 2048);

    // Unknown token keeps its slot with an internal-error stub.
    assert_eq!(submissions[1]["token"], "424242");
    assert_eq!(submissions[1]["status"]["id"], 13);

    assert_eq!(submissions[2]["token"], queued.id.to_string());
    assert_eq!(submissions[2]["status"]["id"], 1);
}

#[actix_web::test]
async fn test_batch_get_requires_tokens() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let req = test::TestRequest::get().uri("/submissions/batch").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::get()
        .uri("/submissions/batch?tokens=abc")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_malformed_json_yields_consistent_error() {
    let store = Arc::new(MemoryStore::new());
    let app = test_app!(store, 0);

    let req = test::TestRequest::post()
        .uri("/create")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "invalid request");
}
