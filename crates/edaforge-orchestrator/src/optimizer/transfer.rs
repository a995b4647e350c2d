//! Project similarity and transfer seeding.

use super::session::{OptimizationSession, ProjectContext};
use crate::registry::ToolSpec;
use edaforge_abstraction::Parameters;

/// Similarity of two project contexts in [0, 1].
///
/// Numeric attributes present in both contexts contribute `1 - relative
/// difference`; tags contribute their Jaccard index. Each part present is
/// averaged in. Two empty contexts are fully similar.
#[must_use]
pub fn context_similarity(a: &ProjectContext, b: &ProjectContext) -> f64 {
    let mut parts = Vec::with_capacity(2);

    let shared: Vec<f64> = a
        .attributes
        .iter()
        .filter_map(|(name, x)| b.attributes.get(name).map(|y| (x, y)))
        .map(|(x, y)| {
            let scale = x.abs().max(y.abs());
            if scale == 0.0 { 1.0 } else { 1.0 - ((x - y).abs() / scale).min(1.0) }
        })
        .collect();
    let attribute_names = a.attributes.keys().chain(b.attributes.keys()).collect::<std::collections::BTreeSet<_>>();
    if !attribute_names.is_empty() {
        parts.push(shared.iter().sum::<f64>() / attribute_names.len() as f64);
    }

    let union = a.tags.union(&b.tags).count();
    if union > 0 {
        parts.push(a.tags.intersection(&b.tags).count() as f64 / union as f64);
    }

    if parts.is_empty() { 1.0 } else { parts.iter().sum::<f64>() / parts.len() as f64 }
}

/// Picks the past session of another project most similar to `context`.
///
/// Only sessions that recorded at least one successful trial are considered.
/// Ties go to the higher best score.
#[must_use]
pub fn most_similar<'a>(
    sessions: &'a [OptimizationSession],
    project_id: &str,
    context: &ProjectContext,
) -> Option<(&'a OptimizationSession, f64)> {
    sessions
        .iter()
        .filter(|s| s.project_id != project_id && s.best_iteration.is_some())
        .map(|s| (s, context_similarity(context, &s.project_context)))
        .max_by(|(a, sa), (b, sb)| sa.total_cmp(sb).then_with(|| a.best_score.total_cmp(&b.best_score)))
}

/// Merges `donor` parameters over `initial`, clamped into the tool's ranges.
///
/// Donor values the tool no longer accepts are skipped.
#[must_use]
pub fn seed_parameters(spec: &ToolSpec, initial: &Parameters, donor: &Parameters) -> Parameters {
    let mut seeded = initial.clone();
    for (name, value) in donor {
        if let Some(clamped) = spec.parameters.get(name).and_then(|param| param.clamp(value)) {
            seeded.insert(name.clone(), clamped);
        }
    }
    seeded
}
