//! End-to-end benchmark runs against the scripted engine.

use llmbench_benchmark::{BenchmarkError, BenchmarkRunner, ResultAggregator};
use llmbench_engine::ScriptedEngine;
use llmbench_models::{ModelDirs, ModelDownloadState, ModelSource, OfflineTransfer, Selection};
use llmbench_monitor::{
    GpuGauge, NullGpuGauge, ProcessRamGauge, ResourceMonitor, SamplingIntervals,
};
use llmbench_session::{ModelSession, ModelState};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn questions() -> Vec<String> {
    vec!["first?".into(), "second?".into(), "third?".into()]
}

fn model(root: &Path, name: &str, downloaded: bool) -> Arc<ModelDownloadState> {
    let dirs = ModelDirs::new(root);
    std::fs::create_dir_all(&dirs.models).unwrap();
    if downloaded {
        std::fs::write(dirs.model_file(&format!("{name}.gguf")), b"GGUF").unwrap();
    }
    let url = format!("https://huggingface.co/org/{name}-GGUF/resolve/main/{name}.gguf");
    let state = ModelDownloadState::new(
        ModelSource::from_hugging_face_url(&url).unwrap(),
        dirs,
        Arc::new(OfflineTransfer),
    );
    state.set_selected(Selection::Benchmark, true);
    state
}

/// GPU that always reports the same utilisation.
struct SteadyGpu(f64);

impl GpuGauge for SteadyGpu {
    fn gpu_usage(&self) -> Option<f64> {
        Some(self.0)
    }
}

fn monitor(session: &ModelSession, scope: &CancellationToken) -> Arc<ResourceMonitor> {
    monitor_with_gpu(session, scope, Arc::new(NullGpuGauge))
}

fn monitor_with_gpu(
    session: &ModelSession,
    scope: &CancellationToken,
    gpu: Arc<dyn GpuGauge>,
) -> Arc<ResourceMonitor> {
    Arc::new(ResourceMonitor::spawn(
        session.subscribe_state(),
        gpu,
        Arc::new(ProcessRamGauge::new()),
        SamplingIntervals::default(),
        scope,
    ))
}

#[tokio::test(start_paused = true)]
async fn test_asks_questions_in_order_and_clears_flag() {
    let root = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new(["an ", "answer"]);
    let probe = engine.probe();
    let session = ModelSession::new(Box::new(engine));
    let runner = BenchmarkRunner::new(session.clone(), questions(), 2).unwrap();

    let tiny = model(root.path(), "tiny", true);
    let summary = runner.run_model(Arc::clone(&tiny)).await.unwrap();

    assert_eq!(probe.prompts(), vec!["first?".to_string(), "second?".to_string()]);
    assert_eq!(summary.answered, 2);
    assert_eq!(summary.failed, 0);
    assert!(summary.finished);
    assert!(!tiny.is_selected(Selection::Benchmark));
    assert_eq!(session.state(), ModelState::Ready);
    assert_eq!(session.messages().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_answers_still_advance() {
    let root = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new(["never", "done"]).failing_after(1);
    let probe = engine.probe();
    let runner = BenchmarkRunner::new(ModelSession::new(Box::new(engine)), questions(), 2).unwrap();

    let summary = runner.run_model(model(root.path(), "tiny", true)).await.unwrap();

    assert_eq!(probe.prompts().len(), 2);
    assert_eq!(summary.answered, 0);
    assert_eq!(summary.failed, 2);
    assert!(summary.finished);
}

#[tokio::test(start_paused = true)]
async fn test_model_must_be_downloaded() {
    let root = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new(["a"]);
    let probe = engine.probe();
    let runner = BenchmarkRunner::new(ModelSession::new(Box::new(engine)), questions(), 2).unwrap();

    let err = runner
        .run_model(model(root.path(), "absent", false))
        .await
        .unwrap_err();

    assert!(matches!(err, BenchmarkError::NotDownloaded(ref name) if name == "absent"));
    assert!(err.is_precondition());
    assert!(probe.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_selected_models_produce_one_result_each() {
    let root = tempfile::tempdir().unwrap();
    let scope = CancellationToken::new();
    let engine = ScriptedEngine::new(["fast ", "reply"]).with_speed(9.5);
    let probe = engine.probe();
    let session = ModelSession::new(Box::new(engine));
    let aggregator = ResultAggregator::builder(monitor(&session, &scope)).spawn(&session, &scope);
    let runner = BenchmarkRunner::new(session.clone(), questions(), 2).unwrap();

    let alpha = model(root.path(), "alpha", true);
    let skipped = model(root.path(), "skipped", true);
    skipped.set_selected(Selection::Benchmark, false);
    let missing = model(root.path(), "missing", false);
    let beta = model(root.path(), "beta", true);

    let summaries = runner
        .run_selected(&[alpha, skipped, missing, beta])
        .await
        .unwrap();

    let names: Vec<_> = summaries.iter().map(|s| s.model_name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta"]);
    assert_eq!(probe.prompts().len(), 4);
    assert_eq!(session.state(), ModelState::NotLoaded);

    let mut results = aggregator.subscribe_results();
    let results = results.wait_for(|r| r.len() == 2).await.unwrap().clone();
    assert_eq!(results[0].model_name(), "alpha");
    assert_eq!(results[1].model_name(), "beta");
    for result in &results {
        assert_eq!(result.decode.average, Some(9.5));
        assert!(result.prefill.average.is_some());
        assert!(result.ram.peak.is_some());
        assert_eq!(result.gpu.average, None);
    }

    aggregator.shutdown().await;
    scope.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_result_carries_gpu_and_ram_when_gauges_report() {
    let root = tempfile::tempdir().unwrap();
    let scope = CancellationToken::new();
    let engine = ScriptedEngine::new(["one ", "two ", "three"]).with_speed(4.0);
    let session = ModelSession::new(Box::new(engine));
    let monitor = monitor_with_gpu(&session, &scope, Arc::new(SteadyGpu(35.0)));
    let aggregator = ResultAggregator::builder(monitor).spawn(&session, &scope);
    let runner = BenchmarkRunner::new(session.clone(), questions(), 1).unwrap();

    runner
        .run_selected(&[model(root.path(), "gamma", true)])
        .await
        .unwrap();

    let mut results = aggregator.subscribe_results();
    let results = results.wait_for(|r| r.len() == 1).await.unwrap().clone();
    let result = &results[0];
    assert_eq!(result.model_name(), "gamma");
    assert_eq!(result.gpu.average, Some(35.0));
    assert_eq!(result.gpu.peak, Some(35.0));
    assert!(result.ram.average.is_some());
    assert_eq!(result.decode.average, Some(4.0));

    aggregator.shutdown().await;
    scope.cancel();
}
