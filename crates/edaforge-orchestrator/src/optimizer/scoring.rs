//! Trial scoring against metric targets.

use edaforge_abstraction::Metrics;

/// Floor for the target magnitude when normalizing distances.
const EPSILON: f64 = 1e-9;

/// Normalized distance between an observed value and its target, capped at 1.
#[must_use]
pub fn metric_distance(actual: f64, target: f64) -> f64 {
    if !actual.is_finite() {
        return 1.0;
    }
    ((actual - target).abs() / target.abs().max(EPSILON)).min(1.0)
}

/// Scores observed metrics against targets.
///
/// Each target contributes its normalized distance; a missing metric costs the
/// maximum. The score is `1 - mean distance`, so 1.0 means every target was hit.
/// An empty target set scores 0.
#[must_use]
pub fn score(metrics: &Metrics, targets: &Metrics) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let total: f64 = targets
        .iter()
        .map(|(name, target)| metrics.get(name).map_or(1.0, |actual| metric_distance(*actual, *target)))
        .sum();
    (1.0 - total / targets.len() as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pairs: &[(&str, f64)]) -> Metrics {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn test_exact_match_scores_one() {
        let targets = metrics(&[("execution_time", 100.0), ("memory_usage", 512.0)]);
        assert!((score(&targets, &targets) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_partial_distance() {
        let targets = metrics(&[("execution_time", 100.0)]);
        let observed = metrics(&[("execution_time", 125.0)]);
        assert!((score(&observed, &targets) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_missing_metric_costs_maximum() {
        let targets = metrics(&[("execution_time", 100.0), ("area", 50.0)]);
        let observed = metrics(&[("execution_time", 100.0)]);
        assert!((score(&observed, &targets) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_distance_is_capped_and_handles_zero_target() {
        assert!((metric_distance(1000.0, 1.0) - 1.0).abs() < f64::EPSILON);
        assert!((metric_distance(0.0, 0.0)).abs() < f64::EPSILON);
        assert!((metric_distance(f64::NAN, 1.0) - 1.0).abs() < f64::EPSILON);
        assert!(score(&Metrics::new(), &Metrics::new()).abs() < f64::EPSILON);
    }
}
