//! Command-line host for the benchmark core.
//!
//! ```text
//! llmbench-demo models
//! llmbench-demo download [MODEL...]
//! llmbench-demo run [MODEL...]
//! llmbench-demo results
//! llmbench-demo clear
//! ```
//!
//! `run` drives the scripted engine; swap in a real backend by implementing
//! `InferenceEngine`. The config file is read from `LLMBENCH_CONFIG` or the
//! data directory.

use anyhow::{bail, Context};
use llmbench_benchmark::{
    download_callbacks, load_questions, BenchmarkConfig, BenchmarkRunner, Device, ResultAggregator,
    ResultRepository,
};
use llmbench_engine::ScriptedEngine;
use llmbench_events::{EventBus, EventBusRef};
use llmbench_models::{
    load_catalog, DownloadController, DownloadGate, HttpTransfer, ModelDownloadState, Selection,
};
use llmbench_monitor::{NullGpuGauge, ProcessRamGauge, ResourceMonitor};
use llmbench_session::{forward_transitions, ModelSession};
use llmbench_storage::Database;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

struct LogBus;

impl EventBus for LogBus {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        tracing::info!(topic, %payload, "event");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,llmbench=debug")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "models".to_string());
    let names: Vec<String> = args.collect();

    let config_path = std::env::var_os("LLMBENCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(BenchmarkConfig::default_path);
    let config = BenchmarkConfig::load_or_default(&config_path)?;
    tracing::info!(command, config = ?config_path, "starting llmbench");

    let dirs = config.model_dirs();
    let models = load_catalog(&dirs, Arc::new(HttpTransfer::new()?))?;
    for model in &models {
        let selected = names.is_empty() || names.iter().any(|n| n == model.model_name());
        model.set_selected(Selection::Benchmark, selected);
    }

    match command.as_str() {
        "models" => list_models(&models),
        "download" => download(&models, &config).await,
        "run" => run(&models, &config).await,
        "results" => {
            let db = Database::open(&config.results_db_path())?;
            println!("{}", serde_json::to_string_pretty(&db.list()?)?);
            Ok(())
        }
        "clear" => {
            let removed = Database::open(&config.results_db_path())?.clear()?;
            println!("removed {removed} results");
            Ok(())
        }
        other => bail!("unknown command {other:?}"),
    }
}

fn list_models(models: &[Arc<ModelDownloadState>]) -> anyhow::Result<()> {
    for model in models {
        let repo = model
            .source()
            .repo_link
            .as_ref()
            .map(|link| link.address.as_str())
            .unwrap_or("-");
        let status = format!("{:?}", model.status());
        println!("{:<40} {status:<12} {repo}", model.model_name());
    }
    Ok(())
}

async fn download(models: &[Arc<ModelDownloadState>], config: &BenchmarkConfig) -> anyhow::Result<()> {
    let bus: EventBusRef = Arc::new(LogBus);
    let controller = DownloadController::start_with_interval(
        models,
        Selection::Benchmark,
        download_callbacks(bus),
        config.download_poll_interval(),
    );

    tokio::select! {
        _ = controller.join() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, cancelling downloads");
            controller.interrupt().await;
        }
    }

    match DownloadGate::evaluate(models, Selection::Benchmark, false) {
        DownloadGate::Finished => Ok(()),
        gate => bail!("downloads incomplete: {gate:?}"),
    }
}

async fn run(models: &[Arc<ModelDownloadState>], config: &BenchmarkConfig) -> anyhow::Result<()> {
    if !models
        .iter()
        .any(|m| m.is_selected(Selection::Benchmark) && m.is_downloaded())
    {
        bail!("no selected model is downloaded; run `download` first");
    }

    let scope = CancellationToken::new();
    let bus: EventBusRef = Arc::new(LogBus);
    let db = Arc::new(Database::open(&config.results_db_path())?);

    let engine = ScriptedEngine::new(["This ", "is ", "a ", "scripted ", "answer."]);
    let session = ModelSession::with_params(
        Box::new(engine),
        config.generation.clone(),
        config.system_prompt.clone(),
    );
    let forwarder = forward_transitions(&session, Arc::clone(&bus), scope.child_token());

    let monitor = Arc::new(ResourceMonitor::spawn(
        session.subscribe_state(),
        Arc::new(NullGpuGauge),
        Arc::new(ProcessRamGauge::new()),
        config.sampling,
        &scope,
    ));
    let mut builder = ResultAggregator::builder(monitor)
        .event_bus(Arc::clone(&bus))
        .repository(Arc::clone(&db));
    if config.attach_device {
        builder = builder.device(Device::detect());
    }
    let aggregator = builder.spawn(&session, &scope);

    let questions = load_questions(Some(&config.questions_path()))?;
    let runner = BenchmarkRunner::new(session.clone(), questions, config.num_messages)?;

    let summaries = tokio::select! {
        summaries = runner.run_selected(models) => summaries?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping benchmark");
            runner.teardown().await?;
            Vec::new()
        }
    };

    let mut results = aggregator.subscribe_results();
    results
        .wait_for(|r| r.len() >= summaries.len())
        .await
        .context("result aggregator stopped")?;

    for summary in &summaries {
        let stored = db.get(&summary.model_name)?;
        println!(
            "{:<40} answered {}/{} decode {:.2} tok/s prefill {:.0} ms",
            summary.model_name,
            summary.answered,
            summary.answered + summary.failed,
            stored.decode.average.unwrap_or_default(),
            stored.prefill.average.unwrap_or_default(),
        );
    }

    aggregator.shutdown().await;
    scope.cancel();
    forwarder.await?;
    session.shutdown();
    Ok(())
}
