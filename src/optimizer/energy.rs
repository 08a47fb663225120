use super::removal::{run_removal, Evaluation, NodeScorer};
use super::{CancelToken, OptimizationOutcome};
use crate::analysis::StaticResponse;
use crate::config::{RemovalConfig, SolverConfig};
use crate::errors::OptimizationError;
use crate::solver::LinearSolver;
use crate::structure::Structure;

/// Scores nodes by the strain energy of their incident elements.
struct StrainEnergyScorer;

impl NodeScorer for StrainEnergyScorer {
    fn evaluate(&mut self, structure: &Structure, response: &StaticResponse) -> Evaluation {
        Evaluation {
            scores: response.node_energy(structure),
            eigen: None,
        }
    }
}

/// Removes the nodes that store the least strain energy until the target mass fraction is met.
#[derive(Clone, Debug, Default)]
pub struct EnergyBasedOptimizer {
    config: RemovalConfig,
    solver: LinearSolver,
    cancel: CancelToken,
}

impl EnergyBasedOptimizer {
    /// Create an optimiser.
    #[must_use]
    pub fn new(config: RemovalConfig, solver: SolverConfig) -> Self {
        Self {
            config,
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

    /// Optimise a private copy of `structure`.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizationError`] when the configuration is invalid or the starting structure
    /// has no load, no support, no load path or cannot be solved.
    pub fn run(&self, structure: &Structure) -> Result<OptimizationOutcome, OptimizationError> {
        run_removal(
            structure,
            &self.config,
            &self.solver,
            &self.cancel,
            &mut StrainEnergyScorer,
        )
    }
}
