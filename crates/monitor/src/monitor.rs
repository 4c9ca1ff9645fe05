//! Background sampling of GPU and RAM usage.

use crate::gauge::{GpuGauge, RamGauge};
use llmbench_metrics::Sampler;
use llmbench_session::ModelState;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Sampling periods shorter than this, zero included, are raised to it.
pub const MIN_SAMPLING_INTERVAL: Duration = Duration::from_millis(1);

/// Polling cadence of the two sampling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingIntervals {
    /// Feeds the samplers behind the aggregate statistics.
    #[serde(with = "millis")]
    pub fast: Duration,
    /// Refreshes the live display values.
    #[serde(with = "millis")]
    pub display: Duration,
}

impl Default for SamplingIntervals {
    fn default() -> Self {
        Self {
            fast: Duration::from_millis(25),
            display: Duration::from_millis(500),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Samplers detached from the monitor by [`ResourceMonitor::take_samples`].
#[derive(Debug, Clone)]
pub struct ResourceSamples {
    pub gpu: Arc<Sampler>,
    pub ram: Arc<Sampler>,
}

impl ResourceSamples {
    fn fresh() -> Self {
        Self {
            gpu: Arc::new(Sampler::new()),
            ram: Arc::new(Sampler::new()),
        }
    }
}

struct Shared {
    gpu: Arc<dyn GpuGauge>,
    ram: Arc<dyn RamGauge>,
    samples: Mutex<ResourceSamples>,
    gpu_display: watch::Sender<Option<f64>>,
    ram_display: watch::Sender<Option<f64>>,
}

impl Shared {
    fn samples(&self) -> MutexGuard<'_, ResourceSamples> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self) {
        let gpu = self.gpu.gpu_usage();
        let ram = self.ram.ram_usage_mb();
        let active = self.samples().clone();

        // a missing GPU reading is skipped, never stored as zero
        if let Some(gpu) = gpu {
            active.gpu.add_sample(gpu);
        }
        active.ram.add_sample(ram);
    }

    fn refresh_display(&self) {
        let gpu = self.gpu.gpu_usage();
        let ram = self.ram.ram_usage_mb();
        self.gpu_display.send_replace(gpu);
        self.ram_display.send_replace(Some(ram));
        tracing::trace!(gpu = ?gpu, ram_mb = ram, "display refreshed");
    }
}

/// Samples the gauges while the watched session is answering.
///
/// Both loops stop when the monitor is dropped or its parent scope is
/// cancelled.
pub struct ResourceMonitor {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ResourceMonitor {
    /// Start the fast and display loops. Must be called from within a tokio
    /// runtime.
    pub fn spawn(
        state: watch::Receiver<ModelState>,
        gpu: Arc<dyn GpuGauge>,
        ram: Arc<dyn RamGauge>,
        intervals: SamplingIntervals,
        parent: &CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            gpu,
            ram,
            samples: Mutex::new(ResourceSamples::fresh()),
            gpu_display: watch::Sender::new(None),
            ram_display: watch::Sender::new(None),
        });
        let cancel = parent.child_token();

        let fast = {
            let shared = Arc::clone(&shared);
            spawn_loop(intervals.fast, state.clone(), cancel.child_token(), move || shared.record())
        };
        let display = {
            let shared = Arc::clone(&shared);
            spawn_loop(intervals.display, state, cancel.child_token(), move || {
                shared.refresh_display()
            })
        };

        tracing::info!(
            fast_ms = intervals.fast.as_millis() as u64,
            display_ms = intervals.display.as_millis() as u64,
            "resource monitor started"
        );
        Self {
            shared,
            cancel,
            tasks: vec![fast, display],
        }
    }

    /// Record one GPU/RAM sample right now, regardless of state.
    pub fn sample_now(&self) {
        self.shared.record();
    }

    /// Detach the active samplers and start fresh ones.
    pub fn take_samples(&self) -> ResourceSamples {
        std::mem::replace(&mut *self.shared.samples(), ResourceSamples::fresh())
    }

    /// Snapshot of the active samplers without detaching them.
    pub fn samples(&self) -> ResourceSamples {
        self.shared.samples().clone()
    }

    pub fn subscribe_gpu_display(&self) -> watch::Receiver<Option<f64>> {
        self.shared.gpu_display.subscribe()
    }

    pub fn subscribe_ram_display(&self) -> watch::Receiver<Option<f64>> {
        self.shared.ram_display.subscribe()
    }

    /// Stop both loops and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "sampling loop ended abnormally");
            }
        }
        tracing::info!("resource monitor stopped");
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_loop<F>(
    period: Duration,
    mut state: watch::Receiver<ModelState>,
    cancel: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(MIN_SAMPLING_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if *state.borrow_and_update() == ModelState::Answering {
                tick();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGauge {
        reads: AtomicUsize,
        gpu: Option<f64>,
    }

    impl CountingGauge {
        fn new(gpu: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                reads: AtomicUsize::new(0),
                gpu,
            })
        }
    }

    impl GpuGauge for CountingGauge {
        fn gpu_usage(&self) -> Option<f64> {
            self.gpu
        }
    }

    impl RamGauge for CountingGauge {
        fn ram_usage_mb(&self) -> f64 {
            self.reads.fetch_add(1, Ordering::SeqCst) as f64 + 100.0
        }
    }

    fn intervals() -> SamplingIntervals {
        SamplingIntervals {
            fast: Duration::from_millis(25),
            display: Duration::from_millis(500),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_only_while_answering() {
        let (state_tx, state_rx) = watch::channel(ModelState::Ready);
        let gauge = CountingGauge::new(Some(40.0));
        let monitor = ResourceMonitor::spawn(
            state_rx,
            gauge.clone(),
            gauge.clone(),
            intervals(),
            &CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(monitor.samples().ram.is_empty());

        state_tx.send_replace(ModelState::Answering);
        tokio::time::sleep(Duration::from_millis(260)).await;
        state_tx.send_replace(ModelState::Ready);

        let samples = monitor.take_samples();
        assert!(samples.ram.len() >= 9, "got {} samples", samples.ram.len());
        assert_eq!(samples.gpu.len(), samples.ram.len());
        assert_eq!(samples.gpu.peak(), Some(40.0));
        assert!(monitor.samples().ram.is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(monitor.samples().ram.is_empty());
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_intervals_keep_sampling() {
        let (_state_tx, state_rx) = watch::channel(ModelState::Answering);
        let gauge = CountingGauge::new(Some(5.0));
        let monitor = ResourceMonitor::spawn(
            state_rx,
            gauge.clone(),
            gauge.clone(),
            SamplingIntervals {
                fast: Duration::ZERO,
                display: Duration::ZERO,
            },
            &CancellationToken::new(),
        );
        let gpu = monitor.subscribe_gpu_display();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let samples = monitor.samples();
        assert!(samples.ram.len() >= 10, "got {} samples", samples.ram.len());
        assert_eq!(samples.gpu.peak(), Some(5.0));
        assert_eq!(*gpu.borrow(), Some(5.0));
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_gpu_reading_is_not_recorded() {
        let (_state_tx, state_rx) = watch::channel(ModelState::Answering);
        let gauge = CountingGauge::new(None);
        let monitor = ResourceMonitor::spawn(
            state_rx,
            gauge.clone(),
            gauge.clone(),
            intervals(),
            &CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let samples = monitor.samples();
        assert!(!samples.ram.is_empty());
        assert!(samples.gpu.is_empty());
        assert_eq!(samples.gpu.measurements().average, None);
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_cells_refresh_on_slow_loop() {
        let (_state_tx, state_rx) = watch::channel(ModelState::Answering);
        let gauge = CountingGauge::new(Some(12.5));
        let monitor = ResourceMonitor::spawn(
            state_rx,
            gauge.clone(),
            gauge.clone(),
            intervals(),
            &CancellationToken::new(),
        );
        let gpu = monitor.subscribe_gpu_display();
        let ram = monitor.subscribe_ram_display();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*gpu.borrow(), Some(12.5));
        assert!(ram.borrow().is_some());
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_stops_loops() {
        let (_state_tx, state_rx) = watch::channel(ModelState::Answering);
        let gauge = CountingGauge::new(Some(1.0));
        let parent = CancellationToken::new();
        let monitor =
            ResourceMonitor::spawn(state_rx, gauge.clone(), gauge.clone(), intervals(), &parent);

        tokio::time::sleep(Duration::from_millis(50)).await;
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let reads = gauge.reads.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(gauge.reads.load(Ordering::SeqCst), reads);
        drop(monitor);
    }

    #[test]
    fn test_interval_defaults() {
        let intervals: SamplingIntervals = serde_json::from_str(r#"{"fast": 10}"#).unwrap();
        assert_eq!(intervals.fast, Duration::from_millis(10));
        assert_eq!(intervals.display, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_sample_now_records_immediately() {
        let (_state_tx, state_rx) = watch::channel(ModelState::Ready);
        let gauge = CountingGauge::new(Some(5.0));
        let monitor = ResourceMonitor::spawn(
            state_rx,
            gauge.clone(),
            gauge.clone(),
            intervals(),
            &CancellationToken::new(),
        );

        monitor.sample_now();
        let samples = monitor.samples();
        assert_eq!(samples.ram.len(), 1);
        assert_eq!(samples.gpu.samples(), vec![5.0]);
        monitor.shutdown().await;
    }
}
