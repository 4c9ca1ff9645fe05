//! Sample accumulation for benchmark runs.
//!
//! A [`Sampler`] collects raw values (GPU load, resident memory, token speed,
//! prefill latency) and projects them into a [`Measurement`] once a run is
//! over. Samplers are never cleared; a new one replaces the old one.

mod measurement;
mod sampler;

pub use measurement::Measurement;
pub use sampler::Sampler;
