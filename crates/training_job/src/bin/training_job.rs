use chrono::{NaiveDate, NaiveTime};
use clap::Parser;
use common::{init_telemetry, ClickHouseAggregateRepository, EventStoreClient, TelemetryConfig};
use std::sync::Arc;
use tracing::{error, info};
use training_job::{
    ClickHouseEventHistoryRepository, ClickHouseTrainingRunRepository,
    ClickHouseTrainingSampleRepository, GeneratorConfig, RunParams, ServiceConfig,
    TrainingSampleGenerator,
};

/// Generate point-in-time-correct training samples for a date range.
#[derive(Debug, Parser)]
#[command(name = "training-job")]
struct Cli {
    /// Restrict the run to one tenant; omit to cover every tenant active in
    /// the range
    #[arg(long)]
    tenant_id: Option<String>,

    /// First day of the range, inclusive (YYYY-MM-DD)
    #[arg(long)]
    start_date: NaiveDate,

    /// Last day of the range, exclusive (YYYY-MM-DD)
    #[arg(long)]
    end_date: NaiveDate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&TelemetryConfig {
        service_name: "training-job".to_string(),
        log_level: config.log_level.clone(),
    }) {
        eprintln!("Failed to initialize telemetry: {e}");
        std::process::exit(1);
    }

    info!(
        tenant_id = ?cli.tenant_id,
        start_date = %cli.start_date,
        end_date = %cli.end_date,
        label_window_days = config.label_window_days,
        "starting training sample generation"
    );

    let event_store = EventStoreClient::new(
        &config.clickhouse_url,
        &config.clickhouse_database,
        &config.clickhouse_username,
        &config.clickhouse_password,
    );
    if let Err(e) = event_store.ping().await {
        error!(error = %e, "event store unreachable, aborting");
        std::process::exit(1);
    }

    let generator = TrainingSampleGenerator::new(
        Arc::new(ClickHouseEventHistoryRepository::new(
            event_store.clone(),
            config.raw_events_table.clone(),
        )),
        Arc::new(ClickHouseAggregateRepository::new(
            event_store.clone(),
            config.raw_events_table.clone(),
        )),
        Arc::new(ClickHouseTrainingSampleRepository::new(
            event_store.clone(),
            config.samples_table.clone(),
        )),
        Arc::new(ClickHouseTrainingRunRepository::new(
            event_store,
            config.runs_table.clone(),
        )),
        GeneratorConfig {
            trigger_event_type: config.trigger_event_type.clone(),
            label_event_type: config.label_event_type.clone(),
            label_window: chrono::Duration::days(config.label_window_days),
        },
    );

    let params = RunParams {
        tenant_id: cli.tenant_id,
        start: cli.start_date.and_time(NaiveTime::MIN).and_utc(),
        end: cli.end_date.and_time(NaiveTime::MIN).and_utc(),
    };

    match generator.run(params).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                tenants_processed = summary.tenants_processed,
                triggers_seen = summary.triggers_seen,
                samples_written = summary.samples_written,
                "training sample generation completed"
            );
        }
        Err(e) => {
            error!(error = %e, "training sample generation failed");
            std::process::exit(1);
        }
    }
}
