//! Service binary: reads raw events as JSON lines from stdin and runs them
//! through the risk pipeline, with the replay scheduler in the background.

use std::io;

use chainwatch_domain::{
    config::PipelineConfig,
    services::telemetry::{init_telemetry, TelemetryConfig},
};
use chainwatch_pipeline::worker::{
    build_components, run_stdin, spawn_maintenance, spawn_metrics_reset, WorkerError,
};
use tokio::io::BufReader;
use tracing::info;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[chainwatch] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), WorkerError> {
    let config = PipelineConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("CHAINWATCH")
        .with_histogram_buckets(&config.monitoring.metrics_buckets);
    let telemetry = init_telemetry(&telemetry_config)?;

    let components = build_components(&config)?;
    let replay = components.replay.clone().map(|scheduler| {
        info!(chains = ?config.replay.chains, "replay scheduler enabled");
        scheduler.start()
    });
    let maintenance = spawn_maintenance(
        components.pipeline.router().clone(),
        config.notification.cleanup_interval,
    );

    let metrics_reset = config.monitoring.reset_interval.map(|interval| {
        spawn_metrics_reset(components.pipeline.monitor().clone(), interval)
    });

    let summary = run_stdin(&components.pipeline, BufReader::new(tokio::io::stdin())).await?;
    info!(
        processed = summary.processed,
        failed = summary.failed,
        malformed = summary.malformed,
        "input exhausted"
    );

    maintenance.abort();
    for handle in [replay, metrics_reset].into_iter().flatten() {
        handle.abort();
    }
    // Pipeline registry first, then the process-wide operational counters.
    println!("{}", components.pipeline.monitor().get_metrics());
    println!("{}", telemetry.render_metrics());
    Ok(())
}
