//! Resource sampling for benchmark runs.
//!
//! Gauges abstract the platform counters; the monitor polls them while the
//! observed session is answering.

mod gauge;
mod monitor;

pub use gauge::{GpuGauge, NullGpuGauge, ProcessRamGauge, RamGauge};
pub use monitor::{ResourceMonitor, ResourceSamples, SamplingIntervals, MIN_SAMPLING_INTERVAL};
