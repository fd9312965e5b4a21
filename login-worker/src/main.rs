//! Drain login events from the queue, mask PII and load them into Postgres.
use envconfig::Envconfig;
use login_worker::config::Config;
use login_worker::error::RunError;
use login_worker::orchestrator::Orchestrator;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

fn setup_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder")
}

#[tokio::main]
async fn main() -> Result<(), RunError> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().expect("Invalid configuration:");
    let metrics = setup_metrics_recorder();

    let orchestrator = Orchestrator::from_config(&config).await?;
    info!(workers = orchestrator.workers(), queue = %config.queue_url, "configured");

    let result = orchestrator.run().await;
    debug!("run metrics:\n{}", metrics.render());

    let report = result?;
    info!(
        state = %report.state,
        drained = report.drained,
        rows_persisted = report.rows_persisted,
        "run finished"
    );

    Ok(())
}
