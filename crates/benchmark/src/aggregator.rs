//! Turns session transitions and resource samples into benchmark results.

use crate::device::Device;
use crate::repository::ResultRepository;
use crate::result::{BenchmarkResult, LlmModel};
use llmbench_events::{
    emit_event, event_names, BenchmarkResultEvent, EventBus, EventBusRef, NullEventBus,
};
use llmbench_metrics::Sampler;
use llmbench_monitor::ResourceMonitor;
use llmbench_session::{Message, ModelSession, ModelState, Transition};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Persist = Box<dyn Fn(&BenchmarkResult) + Send + Sync>;

struct Shared {
    monitor: Arc<ResourceMonitor>,
    results: watch::Sender<Vec<BenchmarkResult>>,
    model_name: Mutex<Option<String>>,
    device: Option<Device>,
    bus: EventBusRef,
    persist: Option<Persist>,
}

pub struct ResultAggregatorBuilder {
    monitor: Arc<ResourceMonitor>,
    device: Option<Device>,
    bus: EventBusRef,
    persist: Option<Persist>,
}

impl ResultAggregatorBuilder {
    /// Attach `device` to every result.
    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn event_bus(mut self, bus: EventBusRef) -> Self {
        self.bus = bus;
        self
    }

    /// Save every result to `repository`. Save failures are logged.
    pub fn repository<R>(mut self, repository: Arc<R>) -> Self
    where
        R: ResultRepository + 'static,
    {
        self.persist = Some(Box::new(move |result| {
            if let Err(e) = repository.save(result) {
                tracing::warn!(model = %result.model_name(), error = %e, "failed to save result");
            }
        }));
        self
    }

    /// Start observing `session`. Must be called from within a tokio runtime.
    pub fn spawn(self, session: &ModelSession, parent: &CancellationToken) -> ResultAggregator {
        let shared = Arc::new(Shared {
            monitor: self.monitor,
            results: watch::Sender::new(Vec::new()),
            model_name: Mutex::new(None),
            device: self.device,
            bus: self.bus,
            persist: self.persist,
        });
        let cancel = parent.child_token();
        let mut transitions = session.subscribe_transitions();

        let task = {
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        received = transitions.recv() => received,
                    };
                    match received {
                        Ok(transition) => shared.observe(transition),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "result aggregator lagged behind the session");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                tracing::debug!("result aggregator stopped");
            })
        };

        ResultAggregator {
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Collects one [`BenchmarkResult`] per model run.
///
/// A run spans from the first `Answering` transition of a model to the
/// session's next `NotLoaded`.
pub struct ResultAggregator {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResultAggregator {
    pub fn builder(monitor: Arc<ResourceMonitor>) -> ResultAggregatorBuilder {
        ResultAggregatorBuilder {
            monitor,
            device: None,
            bus: Arc::new(NullEventBus),
            persist: None,
        }
    }

    pub fn results(&self) -> Vec<BenchmarkResult> {
        self.shared.results.borrow().clone()
    }

    pub fn subscribe_results(&self) -> watch::Receiver<Vec<BenchmarkResult>> {
        self.shared.results.subscribe()
    }

    /// Clear the result list and drop whatever has been sampled so far.
    pub fn reset_results(&self) {
        self.shared.results.send_replace(Vec::new());
        self.shared.reset_run();
        self.shared
            .bus
            .emit(event_names::BENCHMARK_RESULTS_RESET, serde_json::Value::Null);
        tracing::info!("benchmark results reset");
    }

    /// Stop observing and wait for the task to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "result aggregator ended abnormally");
            }
        }
    }
}

impl Drop for ResultAggregator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Shared {
    fn observe(&self, transition: Transition) {
        match transition.state {
            ModelState::Answering => {
                self.monitor.sample_now();
                let mut current = self.model_name.lock().unwrap_or_else(PoisonError::into_inner);
                if *current != transition.model_name {
                    tracing::debug!(model = ?transition.model_name, "benchmarking model");
                    *current = transition.model_name;
                }
            }
            ModelState::NotLoaded => {
                let name = self
                    .model_name
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(name) = name {
                    self.finish_run(name, &transition.messages);
                }
            }
            _ => {}
        }
    }

    fn finish_run(&self, name: String, messages: &[Message]) {
        let (decode, prefill) = speed_samples(messages);
        let resources = self.monitor.take_samples();
        let result = BenchmarkResult {
            phone: self.device.clone(),
            llm_model: LlmModel { name },
            ram: resources.ram.measurements(),
            gpu: resources.gpu.measurements(),
            prefill: prefill.measurements(),
            decode: decode.measurements(),
        };
        tracing::info!(
            model = %result.model_name(),
            decode_avg = ?result.decode.average,
            prefill_avg_ms = ?result.prefill.average,
            ram_peak_mb = ?result.ram.peak,
            "benchmark result recorded"
        );

        if let Some(persist) = &self.persist {
            persist(&result);
        }
        match serde_json::to_value(&result) {
            Ok(payload) => emit_event(
                self.bus.as_ref(),
                event_names::BENCHMARK_RESULT,
                &BenchmarkResultEvent {
                    model_name: result.model_name().to_string(),
                    result: payload,
                },
            ),
            Err(e) => tracing::warn!(error = %e, "failed to serialize result"),
        }
        self.results.send_modify(|results| results.push(result));
    }

    fn reset_run(&self) {
        self.monitor.take_samples();
        *self.model_name.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Decode speed (tokens per second) and prefill latency (milliseconds) of
/// every answered message.
fn speed_samples(messages: &[Message]) -> (Sampler, Sampler) {
    let decode = Sampler::new();
    let prefill = Sampler::new();
    for message in messages {
        if let Some(speed) = message.decode_speed {
            decode.add_sample(f64::from(speed));
        }
        if let Some(latency) = message.prefill {
            prefill.add_sample(latency.as_secs_f64() * 1000.0);
        }
    }
    (decode, prefill)
}
