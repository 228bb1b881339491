use common::{
    init_telemetry, BusClient, EventStoreClient, HealthServer, TelemetryConfig,
};
use funnelcast_runner::Runner;
use materializer::{Materializer, MaterializerConfig, ServiceConfig};
use std::sync::atomic::{AtomicBool, Ordering};
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
        service_name: "materializerd".to_string(),
        log_level: config.log_level.clone(),
    }) {
        eprintln!("Failed to initialize telemetry: {e}");
        std::process::exit(1);
    }

    info!(
        event_stream = %config.event_stream,
        batch_size = config.batch_size,
        batch_timeout_secs = config.batch_timeout_secs,
        "starting materializerd"
    );

    // Fatal startup failures: run broken rather than degraded is not an option.
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

    if let Err(e) = ensure_streams(&bus, &config).await {
        error!(error = %e, "failed to ensure streams, aborting startup");
        std::process::exit(1);
    }

    let ready = Arc::new(AtomicBool::new(false));

    let materializer = match Materializer::new(
        event_store,
        bus.create_consumer_client(),
        bus.create_publisher_client(),
        MaterializerConfig {
            event_stream: config.event_stream.clone(),
            event_subjects: config.consumed_subjects(),
            consumer_name: config.consumer_name.clone(),
            dead_letter_subject: config.dead_letter_subject.clone(),
            raw_events_table: config.raw_events_table.clone(),
            batch_size: config.batch_size,
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
            fetch_wait: Duration::from_secs(config.fetch_wait_secs),
        },
    )
    .await
    {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "failed to initialize materializer");
            std::process::exit(1);
        }
    };

    ready.store(true, Ordering::SeqCst);

    let shutdown = CancellationToken::new();
    let health_addr = match format!("{}:{}", config.health_host, config.health_port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid health endpoint address");
            std::process::exit(1);
        }
    };
    let health = HealthServer::new(health_addr, ready, shutdown.clone(), materializer.stats());

    Runner::new()
        .with_cancellation_token(shutdown)
        .with_boxed_process("materializer_consumer", materializer.into_runner_process())
        .with_named_process("health_server", move |_ctx| health.run())
        .with_closer(move || async move {
            bus.close().await;
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await;
}

async fn ensure_streams(bus: &BusClient, config: &ServiceConfig) -> anyhow::Result<()> {
    bus.ensure_stream(
        &config.event_stream,
        vec![format!("{}.>", config.event_stream)],
    )
    .await?;
    bus.ensure_stream(
        &config.dead_letter_stream,
        vec![format!("{}.>", config.dead_letter_stream)],
    )
    .await?;
    Ok(())
}
