use common::{
    init_telemetry, BusClient, ClickHouseAggregateRepository, EventStoreClient, HealthServer,
    NatsKvFeatureStore, TelemetryConfig,
};
use feature_job::{AggregationStats, FeatureAggregationJob, FeatureJobConfig, ServiceConfig};
use funnelcast_runner::Runner;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig {
        service_name: "feature-jobd".to_string(),
        log_level: config.log_level.clone(),
    }) {
        eprintln!("Failed to initialize telemetry: {e}");
        std::process::exit(1);
    }

    info!(
        cycle_interval_secs = config.cycle_interval_secs,
        active_window_days = config.active_window_days,
        feature_ttl_secs = config.feature_ttl_secs,
        "starting feature-jobd"
    );

    let event_store = EventStoreClient::new(
        &config.clickhouse_url,
        &config.clickhouse_database,
        &config.clickhouse_username,
        &config.clickhouse_password,
    );
    if let Err(e) = event_store.ping().await {
        error!(error = %e, "event store unreachable, aborting startup");
        std::process::exit(1);
    }

    let bus = match BusClient::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "event bus unreachable, aborting startup");
            std::process::exit(1);
        }
    };

    let feature_store = match NatsKvFeatureStore::new(
        bus.jetstream(),
        &config.feature_bucket,
        Duration::from_secs(config.feature_ttl_secs),
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to open feature store bucket, aborting startup");
            std::process::exit(1);
        }
    };

    let aggregates = Arc::new(ClickHouseAggregateRepository::new(
        event_store,
        config.raw_events_table.clone(),
    ));

    let stats = Arc::new(AggregationStats::default());
    let job = FeatureAggregationJob::new(
        aggregates,
        feature_store,
        stats.clone(),
        FeatureJobConfig {
            cycle_interval: Duration::from_secs(config.cycle_interval_secs),
            active_window: chrono::Duration::days(config.active_window_days),
            feature_ttl_seconds: config.feature_ttl_secs,
        },
    );

    // Both stores are connected by now.
    let ready = Arc::new(AtomicBool::new(true));

    let shutdown = CancellationToken::new();
    let health_addr = match format!("{}:{}", config.health_host, config.health_port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid health endpoint address");
            std::process::exit(1);
        }
    };
    let health = HealthServer::new(health_addr, ready, shutdown.clone(), stats);

    Runner::new()
        .with_cancellation_token(shutdown)
        .with_named_process("feature_job", move |ctx| job.run(ctx))
        .with_named_process("health_server", move |_ctx| health.run())
        .with_closer(move || async move {
            bus.close().await;
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await;
}
