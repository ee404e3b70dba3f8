use std::process::Command;
use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use bolt::config::{CliArgs, Config};
use bolt::sandbox::executor::{ExecuteJob, Executor};
use bolt::sandbox::isolate::IsolateSandbox;
use bolt::store::{JobStore, RedisStore};
use bolt::web_server::build_server;
use bolt::worker;

/// Check if a command exists in the system PATH
fn check_command_exists(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = CliArgs::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(log_level));

    if !check_command_exists("isolate") {
        log::error!("Required command 'isolate' not found. Please install isolate.");
        std::process::exit(1);
    }

    let config = Config::from_env();
    let port = config.port;
    let concurrency = config.worker_concurrency();

    let store = match RedisStore::connect(&config.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("Failed to connect to redis at {}: {e:#}", config.redis_url);
            std::process::exit(1);
        }
    };

    let sandbox = Arc::new(IsolateSandbox::new());
    let executor: Arc<dyn ExecuteJob> =
        Arc::new(Executor::new(sandbox, config.use_box_pool, concurrency));
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=concurrency {
        workers.spawn(worker::supervised(
            i,
            store.clone() as Arc<dyn JobStore>,
            executor.clone(),
            shutdown_token.clone(),
        ));
    }

    let server = build_server(config, store.clone() as Arc<dyn JobStore>)?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);
    log::info!("Server running on http://0.0.0.0:{port} with {concurrency} workers");

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {res_server:?}");
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {res_worker:?}");
        }
    }

    // 1. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {e:?}");
            } else {
                log::error!("Worker handle finished with error: {e:?}");
            }
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
