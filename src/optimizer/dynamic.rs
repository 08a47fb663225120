use log::warn;
use petgraph::graph::NodeIndex;

use super::removal::{run_removal, Evaluation, NodeScorer};
use super::{CancelToken, EigenRecord, OptimizationOutcome};
use crate::analysis::StaticResponse;
use crate::assembly::lumped_mass;
use crate::config::{DynamicConfig, RemovalConfig, SolverConfig};
use crate::eigen::EigenSolver;
use crate::errors::OptimizationError;
use crate::solver::LinearSolver;
use crate::structure::{node_dofs, Structure};

/// Blends rank-normalised strain energy with first-mode importance `m (phi_x^2 + phi_y^2)`.
struct ModalScorer {
    config: DynamicConfig,
    eigen: EigenSolver,
}

impl NodeScorer for ModalScorer {
    fn evaluate(&mut self, structure: &Structure, response: &StaticResponse) -> Evaluation {
        let static_scores = response.node_energy(structure);
        let mode = match self
            .eigen
            .solve_structure(structure, self.config.fallback_node_mass)
        {
            Ok(mode) => mode,
            Err(err) => {
                warn!("eigen solve failed ({err}); scoring by strain energy only");
                return Evaluation {
                    scores: static_scores,
                    eigen: None,
                };
            }
        };

        let mass = lumped_mass(structure, self.config.fallback_node_mass);
        let active = structure.active_nodes();
        let mut dynamic_scores = vec![0.0; structure.node_count()];
        for node in &active {
            let [x, _] = node_dofs(*node);
            dynamic_scores[node.index()] = mass[x] * mode.node_amplitude(*node);
        }

        let static_rank = rank_normalise(&static_scores, &active);
        let dynamic_rank = rank_normalise(&dynamic_scores, &active);
        let alpha = self.config.alpha;
        let scores = static_rank
            .iter()
            .zip(&dynamic_rank)
            .map(|(s, d)| (1.0 - alpha) * s + alpha * d)
            .collect();

        Evaluation {
            scores,
            eigen: Some(EigenRecord {
                angular_frequency: mode.angular_frequency,
                frequency: mode.frequency,
                excitation_distance: (mode.angular_frequency - self.config.excitation_frequency)
                    .abs(),
            }),
        }
    }
}

/// Rank of each listed node's value scaled to `[0, 1]`; unlisted nodes get zero.
///
/// Ties keep index order.
fn rank_normalise(values: &[f64], nodes: &[NodeIndex]) -> Vec<f64> {
    let mut ranked = vec![0.0; values.len()];
    let mut order: Vec<_> = nodes.to_vec();
    order.sort_by(|a, b| values[a.index()].total_cmp(&values[b.index()]));
    let denominator = order.len().saturating_sub(1).max(1) as f64;
    for (rank, node) in order.iter().enumerate() {
        ranked[node.index()] = rank as f64 / denominator;
    }
    ranked
}

/// Removal optimiser that also keeps nodes moving strongly in the first vibration mode.
///
/// With `alpha = 0` it behaves like the energy-based optimiser on rank-normalised scores; with
/// `alpha = 1` only the first mode decides. A failed eigen solve falls back to strain energy
/// for that iteration.
#[derive(Clone, Debug, Default)]
pub struct DynamicOptimizer {
    removal: RemovalConfig,
    dynamic: DynamicConfig,
    solver: LinearSolver,
    cancel: CancelToken,
}

impl DynamicOptimizer {
    /// Create an optimiser.
    #[must_use]
    pub fn new(removal: RemovalConfig, dynamic: DynamicConfig, solver: SolverConfig) -> Self {
        Self {
            removal,
            dynamic,
            solver: LinearSolver::new(solver),
            cancel: CancelToken::new(),
        }
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Optimise a private copy of `structure`, recording the first mode of every iteration.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizationError`] when either configuration is invalid or the starting
    /// structure is rejected.
    pub fn run(&self, structure: &Structure) -> Result<OptimizationOutcome, OptimizationError> {
        self.dynamic.validate()?;
        let mut scorer = ModalScorer {
            config: self.dynamic,
            eigen: EigenSolver::default(),
        };
        run_removal(
            structure,
            &self.removal,
            &self.solver,
            &self.cancel,
            &mut scorer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::force;
    use crate::grid::GridSpec;
    use crate::material::steel;

    #[test]
    fn ranks_are_scaled_over_active_nodes() {
        let values = [5.0, 1.0, 3.0, 100.0];
        let nodes = [NodeIndex::new(0), NodeIndex::new(1), NodeIndex::new(2)];
        assert_eq!(rank_normalise(&values, &nodes), vec![1.0, 0.0, 0.5, 0.0]);
        assert_eq!(rank_normalise(&values, &nodes[..1]), vec![0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn every_record_carries_first_mode_metrics() {
        let grid = GridSpec {
            nx: 5,
            ny: 3,
            width: 4.0,
            height: 2.0,
            area: 1.0e-4,
        };
        let mut structure = grid.build(steel()).expect("valid grid");
        grid.apply_simply_supported(&mut structure, force(0.0, -1.0e3))
            .expect("grid matches");
        let removal = RemovalConfig {
            target_mass_fraction: 0.6,
            ..RemovalConfig::default()
        };
        let dynamic = DynamicConfig {
            alpha: 0.5,
            excitation_frequency: 100.0,
            ..DynamicConfig::default()
        };

        let outcome = DynamicOptimizer::new(removal, dynamic, SolverConfig::default())
            .run(&structure)
            .expect("valid input");
        for record in &outcome.history {
            let eigen = record.eigen.expect("mode solved");
            assert!(eigen.angular_frequency > 0.0);
            assert!((eigen.excitation_distance - (eigen.angular_frequency - 100.0).abs()).abs() < 1.0e-9);
        }
    }

    #[test]
    fn invalid_alpha_is_rejected() {
        let dynamic = DynamicConfig {
            alpha: -0.5,
            ..DynamicConfig::default()
        };
        let structure = GridSpec::default().build(steel()).expect("valid grid");
        let result =
            DynamicOptimizer::new(RemovalConfig::default(), dynamic, SolverConfig::default())
                .run(&structure);
        assert!(matches!(result, Err(OptimizationError::Config(_))));
    }
}
