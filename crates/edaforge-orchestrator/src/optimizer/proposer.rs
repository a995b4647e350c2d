//! Parameter proposal strategies.

use super::session::{OptimizationSession, Strategy};
use super::surrogate::Surrogate;
use crate::config::OptimizerConfig;
use crate::registry::ToolSpec;
use edaforge_abstraction::Parameters;
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::debug;

/// Surrogate-guided local search around the best parameters.
#[derive(Debug)]
pub struct SurrogateSearch {
    spec: Arc<ToolSpec>,
    surrogate: Surrogate,
    evaluated: Vec<Parameters>,
    rng: StdRng,
    initial_perturbation: f64,
    min_perturbation: f64,
    candidates: usize,
    exploration_weight: f64,
    max_iterations: u32,
}

impl SurrogateSearch {
    /// Creates a search over `spec`'s parameter space.
    #[must_use]
    pub fn new(spec: Arc<ToolSpec>, config: &OptimizerConfig, max_iterations: u32, rng: StdRng) -> Self {
        Self {
            spec,
            surrogate: Surrogate::new(),
            evaluated: Vec::new(),
            rng,
            initial_perturbation: config.initial_perturbation,
            min_perturbation: config.min_perturbation,
            candidates: config.candidates_per_iteration.max(1),
            exploration_weight: config.exploration_weight,
            max_iterations,
        }
    }

    /// Records an evaluated parameter set.
    pub fn observe(&mut self, params: &Parameters, score: f64) {
        self.surrogate.observe(self.spec.features(params), score);
        self.evaluated.push(params.clone());
    }

    /// Perturbation magnitude for a 0-based iteration, shrinking linearly over the budget.
    #[must_use]
    pub fn scale(&self, iteration: u32) -> f64 {
        let span = f64::from(self.max_iterations.saturating_sub(1).max(1));
        let progress = (f64::from(iteration) / span).min(1.0);
        self.initial_perturbation - (self.initial_perturbation - self.min_perturbation) * progress
    }

    /// Draws one random neighbour of `base`.
    ///
    /// When `base` is empty every declared option is searched, starting from its default.
    pub fn perturb(&mut self, base: &Parameters, scale: f64) -> Parameters {
        let names: Vec<String> =
            if base.is_empty() { self.spec.parameters.keys().cloned().collect() } else { base.keys().cloned().collect() };

        let mut next = base.clone();
        for name in names {
            let Some(param) = self.spec.parameters.get(&name) else {
                continue;
            };
            let current = base.get(&name).cloned().unwrap_or_else(|| param.default_value());
            next.insert(name, param.perturb(&current, scale, &mut self.rng));
        }
        next
    }

    /// Picks the candidate around `best` with the highest upper confidence bound.
    ///
    /// Parameter sets already evaluated are only chosen when nothing new was drawn.
    pub fn propose(&mut self, best: &Parameters, iteration: u32) -> Parameters {
        let scale = self.scale(iteration);
        let mut chosen: Option<(bool, f64, Parameters)> = None;

        for _ in 0..self.candidates {
            let candidate = self.perturb(best, scale);
            let fresh = !self.evaluated.contains(&candidate);
            let value = self.surrogate.acquisition(&self.spec.features(&candidate), self.exploration_weight);
            let better = match &chosen {
                None => true,
                Some((chosen_fresh, chosen_value, _)) => (fresh, value) > (*chosen_fresh, *chosen_value),
            };
            if better {
                chosen = Some((fresh, value, candidate));
            }
        }

        let (fresh, value, params) = chosen.unwrap_or((false, 0.0, best.clone()));
        debug!(iteration, scale, acquisition = value, fresh, "Proposed candidate");
        params
    }
}

/// Strategy-specific proposal logic, chosen once per session.
#[derive(Debug)]
pub enum ParameterProposer {
    /// Surrogate search from the session's seed.
    Bayesian(SurrogateSearch),
    /// Surrogate search from a transfer-seeded starting point.
    TransferLearning(SurrogateSearch),
    /// Parallel bayesian, transfer and exploratory proposals per round.
    Ensemble {
        /// Shared surrogate search.
        search: SurrogateSearch,
        /// Starting point borrowed from the most similar past project.
        transfer_seed: Parameters,
        /// Proposals per round.
        width: usize,
    },
}

impl ParameterProposer {
    /// Builds the proposer for a strategy.
    #[must_use]
    pub fn new(strategy: Strategy, search: SurrogateSearch, transfer_seed: Parameters, width: usize) -> Self {
        match strategy {
            Strategy::Bayesian => Self::Bayesian(search),
            Strategy::TransferLearning => Self::TransferLearning(search),
            Strategy::Ensemble => Self::Ensemble { search, transfer_seed, width: width.max(1) },
        }
    }

    fn search_mut(&mut self) -> &mut SurrogateSearch {
        match self {
            Self::Bayesian(search) | Self::TransferLearning(search) | Self::Ensemble { search, .. } => search,
        }
    }

    /// Records every evaluated candidate of a round.
    pub fn observe(&mut self, params: &Parameters, score: f64) {
        self.search_mut().observe(params, score);
    }

    /// Proposes the parameter sets for the next round.
    ///
    /// The first round evaluates the session's seed as-is.
    pub fn next_round(&mut self, session: &OptimizationSession) -> Vec<Parameters> {
        let iteration = session.iteration_count;
        let first = iteration == 0;
        let best = if session.best_iteration.is_some() { &session.best_params } else { &session.seed_params };

        match self {
            Self::Bayesian(search) | Self::TransferLearning(search) => {
                if first {
                    vec![session.seed_params.clone()]
                } else {
                    vec![search.propose(best, iteration)]
                }
            }
            Self::Ensemble { search, transfer_seed, width } => {
                let scale = search.scale(iteration);
                let mut round = Vec::with_capacity(*width);
                round.push(if first { session.seed_params.clone() } else { search.propose(best, iteration) });
                if *width >= 2 {
                    round.push(if first { transfer_seed.clone() } else { search.perturb(transfer_seed, scale) });
                }
                while round.len() < *width {
                    round.push(search.perturb(best, (scale * 2.0).min(1.0)));
                }
                round
            }
        }
    }
}
