use crate::result::BenchmarkResult;

/// Persistent store of benchmark results, keyed by model name.
///
/// Saving a result for a model that already has one replaces it.
pub trait ResultRepository: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn save(&self, result: &BenchmarkResult) -> Result<(), Self::Error>;
    fn get(&self, model_name: &str) -> Result<BenchmarkResult, Self::Error>;
    fn list(&self) -> Result<Vec<BenchmarkResult>, Self::Error>;
    fn delete(&self, model_name: &str) -> Result<(), Self::Error>;
}
