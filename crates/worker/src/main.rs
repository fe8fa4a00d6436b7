use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use conveyor_core::{Config, JobType};
use conveyor_docparse::{
    GeminiClient, HttpWebhook, ParseDocumentHandler, ParsingTracker, PdfTextExtractor,
    TrackerConfig,
};
use conveyor_infra::{
    JobStore, LocalStorage, PostgresJobStore, RedisCache, RedisStreamsQueue, StatusCache,
};
use conveyor_worker::{HandlerError, HandlerRegistry, Worker, WorkerConfig};

#[tokio::main]
async fn main() {
    conveyor_observability::init();
    let cfg = Config::from_env();

    let pool = match PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database.url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to the durable store");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn JobStore> = {
        let store = PostgresJobStore::new(pool);
        if let Err(e) = store.ensure_schema().await {
            tracing::error!(error = %e, "failed to prepare the jobs schema");
            std::process::exit(1);
        }
        Arc::new(store)
    };

    let cache: Arc<dyn StatusCache> = match RedisCache::connect(&cfg.redis.url()).await {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to the cache");
            std::process::exit(1);
        }
    };

    let consumer =
        match RedisStreamsQueue::connect(&cfg.redis.url(), &cfg.queue.topic, &cfg.queue.group)
            .await
        {
            Ok(queue) => {
                tracing::info!(consumer = queue.consumer_name(), group = %cfg.queue.group, "joined consumer group");
                Arc::new(queue)
            }
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

    let tracker = Arc::new(ParsingTracker::new(
        TrackerConfig {
            max_retries: cfg.parse.max_retries,
            webhook_url: cfg.parse.webhook_url.clone(),
        },
        Arc::new(HttpWebhook::new()),
    ));

    let parse_handler = Arc::new(ParseDocumentHandler::new(
        store.clone(),
        cache.clone(),
        storage,
        Arc::new(PdfTextExtractor::new()),
        Arc::new(GeminiClient::new(
            cfg.parse.gemini_api_key.clone(),
            cfg.parse.gemini_model.clone(),
        )),
        tracker,
        cfg.storage.ttl,
    ));

    let mut registry = HandlerRegistry::new();
    registry.register(JobType::PDF_PARSE, move |ctx| {
        let handler = parse_handler.clone();
        async move {
            // The parse handler runs its own per-document retry loop, so
            // its failures are terminal for the worker.
            handler
                .handle(ctx.message.id, &ctx.cancel)
                .await
                .map(Some)
                .map_err(|e| HandlerError::terminal(e.to_string()))
        }
    });

    let processing_time = cfg.queue.processing_time;
    registry.register("test_job", move |ctx| async move {
        tokio::select! {
            _ = tokio::time::sleep(processing_time) => {
                Ok(Some(serde_json::json!({"message": "simulated processing complete"})))
            }
            _ = ctx.cancel.cancelled() => {
                Err(HandlerError::retryable("cancelled during simulated processing"))
            }
        }
    });

    let cancel = CancellationToken::new();
    let worker = Arc::new(Worker::new(
        consumer,
        store,
        cache,
        registry,
        WorkerConfig {
            retry_max: cfg.queue.retry_max,
            retry_backoff: cfg.queue.retry_backoff,
        },
        cancel.clone(),
    ));

    let mut ready = worker.ready();
    let run = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };
    let _ = ready.wait_for(|live| *live).await;
    tracing::info!("worker ready");

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    // Let the in-flight delivery finish within the drain window.
    if tokio::time::timeout(cfg.server.shutdown_timeout, run)
        .await
        .is_err()
    {
        tracing::warn!("worker did not drain within the shutdown window");
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
