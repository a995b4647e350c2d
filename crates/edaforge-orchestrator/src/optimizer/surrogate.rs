//! Kernel-regression surrogate of the score landscape.
//!
//! Predictions are a Gaussian-kernel weighted average of observed scores,
//! shrunk toward the observed mean. Uncertainty falls as kernel mass near the
//! query point grows.

/// Kernel length scale in normalized parameter space.
const LENGTH_SCALE: f64 = 0.2;
/// Weight of the prior mean in every prediction.
const PRIOR_WEIGHT: f64 = 0.1;

/// Surrogate model over normalized parameter vectors.
#[derive(Debug, Clone, Default)]
pub struct Surrogate {
    observations: Vec<(Vec<f64>, f64)>,
}

impl Surrogate {
    /// Creates an empty surrogate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observation.
    pub fn observe(&mut self, features: Vec<f64>, score: f64) {
        self.observations.push((features, score));
    }

    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Whether nothing has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    fn prior_mean(&self) -> f64 {
        if self.observations.is_empty() {
            0.5
        } else {
            self.observations.iter().map(|(_, y)| y).sum::<f64>() / self.observations.len() as f64
        }
    }

    /// Predicted mean and uncertainty at `features`.
    #[must_use]
    pub fn predict(&self, features: &[f64]) -> (f64, f64) {
        let prior = self.prior_mean();
        let mut weight_sum = 0.0;
        let mut weighted = 0.0;
        for (x, y) in &self.observations {
            let w = kernel(features, x);
            weight_sum += w;
            weighted += w * y;
        }
        let mean = (PRIOR_WEIGHT * prior + weighted) / (PRIOR_WEIGHT + weight_sum);
        (mean, 1.0 / (1.0 + weight_sum))
    }

    /// Upper confidence bound used to rank candidates.
    #[must_use]
    pub fn acquisition(&self, features: &[f64], exploration_weight: f64) -> f64 {
        let (mean, uncertainty) = self.predict(features);
        mean + exploration_weight * uncertainty
    }
}

fn kernel(a: &[f64], b: &[f64]) -> f64 {
    let dims = a.len().max(1) as f64;
    let sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>() / dims;
    (-sq / (2.0 * LENGTH_SCALE * LENGTH_SCALE)).exp()
}
