mod billing;
mod cleanup;
mod config;
mod janitor;
mod spawn;
mod store;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing_subscriber::EnvFilter;

use crate::billing::CreditEngine;
use crate::cleanup::CleanupGuard;
use crate::spawn::{Spawner, SpawnQueue, SpawnerConfig};
use crate::store::SessionStore;
use crate::web::AppState;

fn parse_args() -> (PathBuf, Option<u16>) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("./config/orchestrator.toml");
    let mut port_override = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port_override = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "-h" | "--help" => {
                println!("orchestrator [--config <path>] [--port <port>]");
                std::process::exit(0);
            }
            other => {
                eprintln!("unrecognized argument: {other}");
            }
        }
        i += 1;
    }

    (config_path, port_override)
}

fn init_tracing(format: &str, level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Pull `SpawnAgent` jobs off the durable queue and hand each one to its
/// own task so a slow spawn never stalls the next dequeue.
async fn dispatcher_loop(queue: Arc<SpawnQueue>, spawner: Arc<Spawner>) {
    loop {
        let Some(job) = queue.dequeue(5.0).await else {
            // Either the BLPOP timeout elapsed (expected, retry immediately)
            // or Redis is unreachable — the short sleep caps how fast we
            // spin in the latter case.
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            continue;
        };
        let spawner = Arc::clone(&spawner);
        tokio::spawn(async move {
            spawner.process(job).await;
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config_path, port_override) = parse_args();

    let mut cfg = config::load_config(&config_path)?;
    if let Some(port) = port_override {
        cfg.server.port = port;
    }

    init_tracing(&cfg.log.format, &cfg.log.level);

    if let Err(issues) = cfg.validate() {
        for issue in &issues {
            tracing::error!("{issue}");
        }
        anyhow::bail!("invalid configuration, refusing to start");
    }

    tracing::info!(
        bind = %cfg.server.bind,
        port = cfg.server.port,
        "Starting voice session orchestrator"
    );

    let redis_pool = deadpool_redis::Config::from_url(&cfg.redis.url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .context("failed to build redis pool")?;

    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.url)
        .await
        .context("failed to connect to billing database")?;

    let store = Arc::new(SessionStore::new(redis_pool.clone()));
    let credit_engine = Arc::new(CreditEngine::new(db_pool, redis_pool.clone()));
    let spawn_queue = Arc::new(SpawnQueue::new(redis_pool));
    let cleanup_guard = Arc::new(CleanupGuard::new());

    let spawner = Arc::new(Spawner::new(
        Arc::clone(&store),
        SpawnerConfig {
            agent_binary_path: cfg.agent.binary_path.clone(),
            agent_log_dir: cfg.agent.log_dir.clone(),
            orchestrator_url: cfg.agent.orchestrator_url.clone(),
            bot_startup_timeout: std::time::Duration::from_secs(cfg.session.bot_startup_timeout_secs),
            record_ttl_secs: cfg.session.record_ttl_secs,
        },
    ));

    tokio::spawn(dispatcher_loop(Arc::clone(&spawn_queue), spawner));

    tokio::spawn(janitor::health_check_loop(
        Arc::clone(&store),
        cfg.agent.binary_path.clone(),
        cfg.session.record_ttl_secs,
    ));
    tokio::spawn(janitor::reaper_loop(
        Arc::clone(&store),
        cfg.session.session_timeout_secs,
        Arc::clone(&credit_engine),
        Arc::clone(&spawn_queue),
        Arc::clone(&cleanup_guard),
    ));

    let state = Arc::new(AppState {
        config: cfg.clone(),
        store,
        credit_engine,
        spawn_queue,
        cleanup_guard,
        started_at: std::time::Instant::now(),
    });

    let app = web::build_router(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let addr = format!("{}:{}", cfg.server.bind, cfg.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining");
}
