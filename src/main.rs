use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use interaction_recs::api::{create_router, AppState};
use interaction_recs::config::Config;
use interaction_recs::db::redis::{
    connect_manager, create_redis_client, RedisCandidateStore, RedisStreamPublisher,
    RedisStreamSource,
};
use interaction_recs::db::{CandidateStore, CsvInteractionLog, InteractionLog};
use interaction_recs::services::computer::{
    ModelRecsJob, NovelItemsJob, RecommendationComputer, TopItemsJob,
};
use interaction_recs::services::factorization::MatrixFactorization;
use interaction_recs::services::{Ingestor, ItemCatalog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let retry = config.retry_policy();

    // Interaction log
    let log = Arc::new(CsvInteractionLog::new(&config.interactions_path));
    if config.reset_log_on_start {
        log.reset().await?;
    }
    let log: Arc<dyn InteractionLog> = log;

    // Candidate cache and event stream share one Redis deployment; the stream
    // source blocks server-side and opens its own connection
    let redis_client = create_redis_client(&config.redis_url)?;
    let conn = connect_manager(&redis_client, &retry).await?;
    let (redis_store, cache_writer) = RedisCandidateStore::new(conn.clone());
    let store: Arc<dyn CandidateStore> = Arc::new(redis_store);

    let mut source = RedisStreamSource::connect(
        &redis_client,
        &config.event_stream,
        &config.consumer_group,
        &config.consumer_name,
        retry,
    )
    .await?;
    let publisher = Arc::new(RedisStreamPublisher::new(conn, &config.event_stream));

    // Ingestion
    let ingestor = Ingestor::new(log.clone(), config.flush_interval());
    let mut ingest_task = tokio::spawn(async move { ingestor.run(&mut source).await });

    // Recommendation jobs
    let computer = Arc::new(RecommendationComputer::new(log.clone(), store.clone()));
    let model = Arc::new(MatrixFactorization::new(config.factorization_params()));
    let jobs = vec![
        computer.spawn(
            Arc::new(TopItemsJob::new(config.top_items_limit)),
            Duration::from_secs(config.top_items_interval_secs),
        ),
        computer.spawn(
            Arc::new(ModelRecsJob::new(model, config.model_weighting, config.recs_k)),
            Duration::from_secs(config.model_interval_secs),
        ),
        computer.spawn(
            Arc::new(NovelItemsJob::new(config.recs_k)),
            Duration::from_secs(config.novel_items_interval_secs),
        ),
    ];

    // Serving
    let state = AppState::new(
        store,
        Arc::new(ItemCatalog::new()),
        publisher,
        config.serving_policy(),
    );
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server running");

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    });

    let outcome: anyhow::Result<()> = tokio::select! {
        served = async move { server.await } => served.map_err(Into::into),
        ingested = &mut ingest_task => match ingested {
            Ok(Ok(())) => Err(anyhow::anyhow!("event source closed unexpectedly")),
            Ok(Err(e)) => Err(anyhow::anyhow!("ingestion failed: {}", e)),
            Err(e) => Err(anyhow::anyhow!("ingestion task crashed: {}", e)),
        },
    };

    for job in jobs {
        job.abort();
    }
    ingest_task.abort();
    cache_writer.shutdown().await;

    if let Err(e) = &outcome {
        tracing::error!(error = %e, "Fatal error, exiting");
    }
    outcome
}
