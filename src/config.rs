use clap::Parser;

#[derive(Parser)]
#[command(name = "bolt", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Enable debug-level logging
    #[arg(long = "verbose", short = 'v', default_value_t = false)]
    pub verbose: bool,
}

/// Runtime configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub port: u16,
    pub use_box_pool: bool,
    /// Per-queue admission limit; zero means unlimited.
    pub queue_length_limit: i64,
    pub worker_multiplier: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env_string("REDIS_URL", "redis://127.0.0.1/"),
            port: env_int("PORT", 3001).clamp(1, u16::MAX as i64) as u16,
            use_box_pool: env_bool("USE_BOX_POOL", true),
            queue_length_limit: env_int("QUEUE_LENGTH_LIMIT", 1000),
            worker_multiplier: env_int("WORKER_MULTIPLIER", 2).max(1) as usize,
        }
    }

    /// Worker count: available CPUs times the configured multiplier.
    pub fn worker_concurrency(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus * self.worker_multiplier).max(1)
    }
}

fn env_string(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => fallback.to_string(),
    }
}

fn env_int(key: &str, fallback: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_bool(key: &str, fallback: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(fallback)
}

/// Accepts the usual spellings; anything else defers to the fallback.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
