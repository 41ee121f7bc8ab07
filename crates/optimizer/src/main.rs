//! Cost Optimizer - cloud cost optimization control plane
//!
//! This binary inventories the configured cloud account, serves the
//! dashboard API and applies optimizations at most once through the
//! idempotency ledger.

use anyhow::{Context, Result};
use cost_optimizer::{api, config::OptimizerConfig, recovery::AdapterRecoveryHandler};
use optimizer_lib::{
    cloud::create_adapter,
    health::{components, HealthRegistry},
    idempotency::IdempotencyEngine,
    inventory::InventoryPipeline,
    ledger::SqliteLedger,
    observability::{AuditLogger, OptimizerMetrics},
    scheduler::SchedulerBuilder,
    suggest::RuleBasedSuggester,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const OPTIMIZER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = OPTIMIZER_VERSION, "Starting cost-optimizer");

    let config = OptimizerConfig::load()?;
    info!(
        provider = %config.cloud_provider,
        region = %config.cloud_region,
        dry_run = config.dry_run,
        ledger_path = %config.ledger_path.display(),
        "Optimizer configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::INVENTORY).await;
    health_registry.register(components::LEDGER).await;
    health_registry.register(components::SCHEDULER).await;

    let metrics = OptimizerMetrics::new().context("failed to register metrics")?;

    let ledger = SqliteLedger::open(&config.ledger_path)
        .await
        .with_context(|| format!("failed to open ledger at {}", config.ledger_path.display()))?;
    let engine = IdempotencyEngine::new(Arc::new(ledger.clone()), AuditLogger::default())
        .with_metrics(metrics.clone());

    let adapter = create_adapter(config.adapter_config())?;
    let pipeline = Arc::new(
        InventoryPipeline::new(
            adapter.clone(),
            Arc::new(RuleBasedSuggester::default()),
            config.pipeline_config(),
            health_registry.clone(),
        )?
        .with_metrics(metrics.clone()),
    );

    let scheduler = SchedulerBuilder::new()
        .pipeline(pipeline.clone())
        .engine(engine.clone())
        .recovery_handler(Arc::new(AdapterRecoveryHandler::new(adapter)))
        .health(health_registry.clone())
        .config(config.scheduler_config())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry,
        metrics,
        pipeline,
        engine,
    ));

    let mut api_shutdown = shutdown_tx.subscribe();
    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    // Wait for a shutdown signal, or for the API server to stop on its own
    let early_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("SIGINT received, shutting down");
            None
        }
        result = &mut api_handle => Some(result),
    };
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler task panicked");
    }
    let api_result = match early_exit {
        Some(result) => result,
        None => api_handle.await,
    };
    match api_result {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    ledger.close().await;
    info!("Shutdown complete");
    Ok(())
}
