pub mod buffers;
pub mod config;
pub mod job;
pub mod routes;
pub mod sandbox;
pub mod store;
pub mod verdict;
pub mod web_server;
pub mod worker;

/// Nanoseconds since the Unix epoch. Zero-valued timestamps on a job mean
/// "not yet".
pub fn now_nanos() -> i64 {
    use chrono::Utc;
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
