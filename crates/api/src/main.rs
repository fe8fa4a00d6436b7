use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use conveyor_api::AppState;
use conveyor_auth::{Hs256Tokens, StaticCredentials};
use conveyor_core::Config;
use conveyor_infra::{LocalStorage, PostgresJobStore, RedisCache, RedisStreamsQueue};

#[tokio::main]
async fn main() {
    conveyor_observability::init();
    let cfg = Config::from_env();

    let pool = match PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database.url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to the durable store");
            std::process::exit(1);
        }
    };

    let store = PostgresJobStore::new(pool);
    if let Err(e) = store.ensure_schema().await {
        tracing::error!(error = %e, "failed to prepare the jobs schema");
        std::process::exit(1);
    }

    let cache = match RedisCache::connect(&cfg.redis.url()).await {
        Ok(cache) => cache,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to the cache");
            std::process::exit(1);
        }
    };

    let producer =
        match RedisStreamsQueue::connect(&cfg.redis.url(), &cfg.queue.topic, &cfg.queue.group)
            .await
        {
            Ok(queue) => queue,
            Err(e) => {
                tracing::error!(error = %e, "failed to connect to the job queue");
                std::process::exit(1);
            }
        };

    let storage = match LocalStorage::new(&cfg.storage.temp_dir, cfg.storage.max_size) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            tracing::error!(error = %e, "failed to prepare the staging directory");
            std::process::exit(1);
        }
    };

    let state = AppState {
        store: Arc::new(store),
        cache: Arc::new(cache),
        producer: Arc::new(producer),
        storage,
        tokens: Arc::new(Hs256Tokens::new(
            cfg.jwt.secret.as_bytes(),
            cfg.jwt.expiration,
        )),
        credentials: Arc::new(StaticCredentials::new(
            cfg.auth.email.clone(),
            cfg.auth.password.clone(),
        )),
        staging_ttl: cfg.storage.ttl,
    };

    let app = conveyor_api::build_app(state);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", cfg.server.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(port = cfg.server.port, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!("listening on {}", listener.local_addr().unwrap());

    let shutdown_timeout = cfg.server.shutdown_timeout;
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received; draining");
        // Bound the drain window.
        tokio::spawn(async move {
            tokio::time::sleep(shutdown_timeout).await;
            tracing::warn!("drain window elapsed; exiting");
            std::process::exit(0);
        });
    });

    if let Err(e) = serve.await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
