use crate::device::Device;
use llmbench_metrics::Measurement;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmModel {
    pub name: String,
}

/// Per-model benchmark record, serialized with the submission field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    #[serde(default)]
    pub phone: Option<Device>,
    pub llm_model: LlmModel,
    /// Process memory in MB.
    pub ram: Measurement,
    /// GPU utilisation in percent.
    pub gpu: Measurement,
    /// Time to first chunk in milliseconds.
    pub prefill: Measurement,
    /// Tokens per second.
    pub decode: Measurement,
}

impl BenchmarkResult {
    pub fn model_name(&self) -> &str {
        &self.llm_model.name
    }
}
