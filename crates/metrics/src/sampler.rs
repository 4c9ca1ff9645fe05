use crate::Measurement;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Samples {
    values: Vec<f64>,
    peak: f64,
}

/// Thread-safe accumulator of numeric samples.
///
/// Written from background sampling tasks and read from the aggregation task,
/// so every operation takes the same per-instance lock.
#[derive(Debug)]
pub struct Sampler {
    inner: Mutex<Samples>,
    created_at: DateTime<Utc>,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Samples {
                values: Vec::new(),
                peak: f64::MIN,
            }),
            created_at: Utc::now(),
        }
    }
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Samples> {
        // Samples stay consistent even if a writer panicked mid-push.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_sample(&self, sample: f64) {
        let mut inner = self.lock();
        if sample > inner.peak {
            inner.peak = sample;
        }
        inner.values.push(sample);
    }

    /// Copy of every sample in insertion order.
    pub fn samples(&self) -> Vec<f64> {
        self.lock().values.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().values.is_empty()
    }

    pub fn sum(&self) -> Option<f64> {
        self.measurements().sum
    }

    pub fn average(&self) -> Option<f64> {
        self.measurements().average
    }

    pub fn peak(&self) -> Option<f64> {
        let inner = self.lock();
        (!inner.values.is_empty()).then_some(inner.peak)
    }

    pub fn std(&self) -> Option<f64> {
        self.measurements().std
    }

    pub fn median(&self) -> Option<f64> {
        self.measurements().median
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Summary statistics over everything collected so far.
    pub fn measurements(&self) -> Measurement {
        let inner = self.lock();
        Measurement::from_samples(&inner.values, inner.peak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_sampler_has_no_values() {
        let sampler = Sampler::new();
        assert!(sampler.is_empty());
        assert_eq!(sampler.peak(), None);
        assert_eq!(sampler.average(), None);
        assert_eq!(sampler.median(), None);
        assert_eq!(sampler.std(), None);
        assert_eq!(sampler.sum(), None);
    }

    #[test]
    fn test_peak_is_max_sample() {
        let sampler = Sampler::new();
        for v in [3.5, -1.0, 12.25, 7.0, 12.0] {
            sampler.add_sample(v);
        }
        assert_eq!(sampler.peak(), Some(12.25));
        assert_eq!(sampler.measurements().peak, Some(12.25));
    }

    #[test]
    fn test_peak_with_only_negative_samples() {
        let sampler = Sampler::new();
        sampler.add_sample(-4.0);
        sampler.add_sample(-2.0);
        assert_eq!(sampler.peak(), Some(-2.0));
    }

    #[test]
    fn test_average_times_count_matches_sum() {
        let sampler = Sampler::new();
        let values = [0.1, 0.2, 0.3, 10.7, 3.3333, 99.9];
        for v in values {
            sampler.add_sample(v);
        }
        let m = sampler.measurements();
        let avg = m.average.unwrap();
        let sum = m.sum.unwrap();
        assert!((avg * values.len() as f64 - sum).abs() < 1e-9);
    }

    #[test]
    fn test_std_of_identical_values_is_zero() {
        let sampler = Sampler::new();
        for _ in 0..16 {
            sampler.add_sample(42.0);
        }
        assert_eq!(sampler.std(), Some(0.0));
    }

    #[test]
    fn test_median_rules() {
        let odd = Sampler::new();
        for v in [1.0, 2.0, 3.0] {
            odd.add_sample(v);
        }
        assert_eq!(odd.median(), Some(2.0));

        let even = Sampler::new();
        for v in [1.0, 2.0, 3.0, 4.0] {
            even.add_sample(v);
        }
        assert_eq!(even.median(), Some(2.5));
    }

    #[test]
    fn test_measurements_do_not_mutate() {
        let sampler = Sampler::new();
        sampler.add_sample(5.0);
        sampler.add_sample(1.0);
        let first = sampler.measurements();
        let second = sampler.measurements();
        assert_eq!(first, second);
        assert_eq!(sampler.samples(), vec![5.0, 1.0]);
    }

    #[test]
    fn test_concurrent_writers() {
        let sampler = Arc::new(Sampler::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sampler = Arc::clone(&sampler);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        sampler.add_sample((t * 1000 + i) as f64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sampler.len(), 1000);
        assert_eq!(sampler.peak(), Some(3249.0));
    }
}
