use serde::{Deserialize, Serialize};

/// Summary statistics of one metric stream.
///
/// Every field is `None` when no sample was collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub average: Option<f64>,
    pub median: Option<f64>,
    pub peak: Option<f64>,
    pub std: Option<f64>,
    pub sum: Option<f64>,
}

impl Measurement {
    pub fn is_empty(&self) -> bool {
        self.average.is_none()
    }

    pub(crate) fn from_samples(samples: &[f64], peak: f64) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let sum: f64 = samples.iter().sum();
        let average = sum / samples.len() as f64;

        Self {
            average: Some(average),
            median: Some(median(samples)),
            peak: Some(peak),
            std: Some(population_std(samples, average)),
            sum: Some(sum),
        }
    }
}

fn median(samples: &[f64]) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[middle - 1] + sorted[middle]) / 2.0
    } else {
        sorted[middle]
    }
}

fn population_std(samples: &[f64], mean: f64) -> f64 {
    let squared: f64 = samples.iter().map(|x| (x - mean) * (x - mean)).sum();
    (squared / samples.len() as f64).sqrt()
}
