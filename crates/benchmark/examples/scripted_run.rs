//! Benchmark two scripted models end to end and print their results.
//!
//! Run with `RUST_LOG=debug` for per-transition logging.

use anyhow::Context;
use llmbench_benchmark::{
    load_questions, BenchmarkConfig, BenchmarkRunner, Device, ResultAggregator,
};
use llmbench_engine::ScriptedEngine;
use llmbench_events::{EventBus, EventBusRef};
use llmbench_models::{ModelDownloadState, ModelSource, OfflineTransfer, Selection};
use llmbench_monitor::{NullGpuGauge, ProcessRamGauge, ResourceMonitor};
use llmbench_session::{forward_transitions, ModelSession};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

struct LogBus;

impl EventBus for LogBus {
    fn emit(&self, topic: &str, payload: serde_json::Value) {
        tracing::info!(topic, %payload, "event");
    }
}

const MODELS: [&str; 2] = [
    "https://huggingface.co/demo/alpha-GGUF/resolve/main/alpha.gguf",
    "https://huggingface.co/demo/beta-GGUF/resolve/main/beta.gguf",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,llmbench=debug")),
        )
        .init();

    let root = tempfile::tempdir()?;
    let config = BenchmarkConfig {
        models_root: Some(root.path().to_path_buf()),
        ..Default::default()
    };
    let dirs = config.model_dirs();
    std::fs::create_dir_all(&dirs.models)?;

    let mut models = Vec::new();
    for url in MODELS {
        let source = ModelSource::from_hugging_face_url(url).context("bad model url")?;
        std::fs::write(dirs.model_file(&source.file_name), b"GGUF")?;
        let model = ModelDownloadState::new(source, dirs.clone(), Arc::new(OfflineTransfer));
        model.set_selected(Selection::Benchmark, true);
        models.push(model);
    }

    let scope = CancellationToken::new();
    let bus: EventBusRef = Arc::new(LogBus);
    let engine = ScriptedEngine::new(["Rust ", "is ", "a ", "language."])
        .with_chunk_delay(Duration::from_millis(50));
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
    let mut builder = ResultAggregator::builder(monitor).event_bus(Arc::clone(&bus));
    if config.attach_device {
        builder = builder.device(Device::detect());
    }
    let aggregator = builder.spawn(&session, &scope);

    let questions = load_questions(None)?;
    let runner = BenchmarkRunner::new(session.clone(), questions, config.num_messages)?;
    let summaries = runner.run_selected(&models).await?;
    for summary in &summaries {
        tracing::info!(
            model = %summary.model_name,
            answered = summary.answered,
            failed = summary.failed,
            "run summary"
        );
    }

    let mut results = aggregator.subscribe_results();
    let results = results
        .wait_for(|r| r.len() == summaries.len())
        .await
        .context("aggregator stopped")?
        .clone();
    println!("{}", serde_json::to_string_pretty(&results)?);

    aggregator.shutdown().await;
    scope.cancel();
    forwarder.await?;
    session.shutdown();
    Ok(())
}
