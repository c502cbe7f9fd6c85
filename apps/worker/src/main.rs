use std::sync::Arc;

use seriesflow_core::events::LogPipelineEventSink;
use seriesflow_core::orchestrator::Health;
use seriesflow_worker::config::Config;
use seriesflow_worker::{build_pipeline, describe_plan, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let pipeline = build_pipeline(&config, Arc::new(LogPipelineEventSink)).await?;
    if config.dry_run {
        print!("{}", describe_plan(&pipeline.orchestrator));
        pipeline.orchestrator.close().await;
        return Ok(());
    }

    let report = pipeline
        .orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!(
        "Run finished: health={:?} forced={} stats={:?}",
        report.health,
        report.forced,
        report.stats
    );
    for (key, state) in &report.states {
        tracing::info!("  {} ended {:?}", key, state);
    }
    anyhow::ensure!(report.health != Health::Failed, "every extractor failed");
    Ok(())
}
