//! Topology optimisation strategies and the history they produce.
//!
//! Every run works on its own clone of the input structure and returns the final design together
//! with one [`IterationRecord`] per accepted iteration, starting with the untouched input.

mod dynamic;
mod energy;
mod removal;
mod simp;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use dynamic::DynamicOptimizer;
pub use energy::EnergyBasedOptimizer;
pub use simp::SimpOptimizer;

use crate::analysis::{analyse, StaticResponse};
use crate::config::OptimizationConfig;
use crate::connectivity::loads_reach_supports;
use crate::errors::OptimizationError;
use crate::geometry::Displacement;
use crate::solver::LinearSolver;
use crate::structure::{Snapshot, Structure};

/// Cooperative cancellation flag shared between a caller and a running optimisation.
///
/// The flag is polled between iterations and between rebuild combinations, never inside a solve.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The target mass or volume fraction was reached.
    TargetReached,
    /// A removal would have pushed the peak stress beyond the allowable stress.
    StressLimitReached,
    /// Every remaining candidate is protected, blacklisted or breaks the structure.
    NoRemovableCandidate,
    /// The iteration budget ran out.
    MaxIterations,
    /// SIMP densities stopped changing.
    Converged,
    /// The accepted design could no longer be solved.
    SolveFailed,
    /// The caller cancelled the run.
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::TargetReached => "target fraction reached",
            Self::StressLimitReached => "stress limit reached",
            Self::NoRemovableCandidate => "no removable candidate left",
            Self::MaxIterations => "iteration budget exhausted",
            Self::Converged => "converged",
            Self::SolveFailed => "structure could not be solved",
            Self::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// First-mode metrics of an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EigenRecord {
    /// Angular frequency in rad/s.
    pub angular_frequency: f64,
    /// Frequency in hertz.
    pub frequency: f64,
    /// Distance `|omega - omega_E|` to the excitation in rad/s.
    pub excitation_distance: f64,
}

/// Immutable record of an accepted iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Iteration number; zero is the starting design.
    pub iteration: usize,
    /// Activity flags and areas after the iteration.
    pub snapshot: Snapshot,
    /// Active material relative to the starting design.
    pub mass_fraction: f64,
    /// Indices of nodes deactivated in this iteration, pruned nodes included.
    pub removed_nodes: Vec<usize>,
    /// Strain energy per element.
    pub element_energy: Vec<f64>,
    /// Displacement per node.
    pub displacements: Vec<Displacement>,
    /// Peak absolute element stress in pascals.
    pub max_stress: f64,
    /// Compliance `u^T K u`.
    pub compliance: f64,
    /// First-mode metrics when the strategy computes them.
    pub eigen: Option<EigenRecord>,
    /// Element densities for SIMP runs.
    pub densities: Option<Vec<f64>>,
}

/// Mutable state of a run between two recorded iterations.
#[derive(Clone, Debug)]
pub struct OptimizationState {
    /// Working copy of the structure.
    pub structure: Structure,
    /// Number of accepted iterations so far.
    pub iteration: usize,
    /// Active volume of the starting design.
    pub initial_volume: f64,
    /// Response of the current design.
    pub response: StaticResponse,
    /// Set once the run has stopped.
    pub termination: Option<TerminationReason>,
}

impl OptimizationState {
    pub(crate) fn new(structure: Structure, response: StaticResponse) -> Self {
        let initial_volume = structure.active_volume();
        Self {
            structure,
            iteration: 0,
            initial_volume,
            response,
            termination: None,
        }
    }

    /// Current active volume relative to the starting design.
    #[must_use]
    pub fn mass_fraction(&self) -> f64 {
        if self.initial_volume > 0.0 {
            self.structure.active_volume() / self.initial_volume
        } else {
            0.0
        }
    }

    /// Freeze the current state into a history record.
    #[must_use]
    pub fn record(&self, removed_nodes: Vec<usize>, eigen: Option<EigenRecord>) -> IterationRecord {
        IterationRecord {
            iteration: self.iteration,
            snapshot: self.structure.snapshot(),
            mass_fraction: self.mass_fraction(),
            removed_nodes,
            element_energy: self.response.element_energy.clone(),
            displacements: self.response.node_displacements(),
            max_stress: self.response.max_stress(),
            compliance: self.response.compliance,
            eigen,
            densities: None,
        }
    }
}

/// Result of a completed run.
#[derive(Clone, Debug)]
pub struct OptimizationOutcome {
    /// Final design.
    pub structure: Structure,
    /// Accepted iterations in order, starting with the input design.
    pub history: Vec<IterationRecord>,
    /// Why the run stopped.
    pub termination: TerminationReason,
}

impl OptimizationOutcome {
    /// Mass fraction of the final design.
    #[must_use]
    pub fn mass_fraction(&self) -> f64 {
        self.history.last().map_or(1.0, |record| record.mass_fraction)
    }

    /// Last recorded iteration.
    #[must_use]
    pub fn last_record(&self) -> Option<&IterationRecord> {
        self.history.last()
    }
}

/// Available optimisation strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Strain-energy driven node removal.
    Static,
    /// Node removal blending strain energy with first-mode importance.
    Dynamic,
    /// Continuous density optimisation with penalisation.
    Simp,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Simp => "simp",
        };
        f.write_str(text)
    }
}

/// Entry point running any [`Strategy`] from one [`OptimizationConfig`].
#[derive(Clone, Debug, Default)]
pub struct Optimizer {
    config: OptimizationConfig,
    cancel: CancelToken,
}

impl Optimizer {
    /// Create an optimiser with the given configuration.
    #[must_use]
    pub fn new(config: OptimizationConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Run `strategy` on a private copy of `structure`.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizationError`] when the configuration or the starting structure is rejected.
    ///
    /// # Examples
    /// ```
    /// use trusstopo::{force, steel, GridSpec, OptimizationConfig, Optimizer, Strategy};
    ///
    /// let grid = GridSpec::default();
    /// let mut structure = grid.build(steel()).unwrap();
    /// grid.apply_simply_supported(&mut structure, force(0.0, -1.0e3)).unwrap();
    ///
    /// let outcome = Optimizer::new(OptimizationConfig::default())
    ///     .run(Strategy::Static, &structure)
    ///     .unwrap();
    /// assert!(outcome.mass_fraction() <= 0.5);
    /// ```
    pub fn run(
        &self,
        strategy: Strategy,
        structure: &Structure,
    ) -> Result<OptimizationOutcome, OptimizationError> {
        match strategy {
            Strategy::Static => {
                EnergyBasedOptimizer::new(self.config.removal, self.config.solver)
                    .with_cancel_token(self.cancel.clone())
                    .run(structure)
            }
            Strategy::Dynamic => DynamicOptimizer::new(
                self.config.removal,
                self.config.dynamic,
                self.config.solver,
            )
            .with_cancel_token(self.cancel.clone())
            .run(structure),
            Strategy::Simp => SimpOptimizer::new(self.config.simp, self.config.solver)
                .with_cancel_token(self.cancel.clone())
                .run(structure),
        }
    }
}

/// Check that a structure can enter an optimisation run and return its static response.
///
/// # Errors
///
/// Returns [`OptimizationError::InvalidStructure`] when there is no load, no support or no load
/// path, and [`OptimizationError::Solve`] when the structure cannot be solved.
pub fn validate_for_optimization(
    structure: &Structure,
    solver: &LinearSolver,
) -> Result<StaticResponse, OptimizationError> {
    if structure.loaded_nodes().is_empty() {
        return Err(OptimizationError::InvalidStructure(
            "no active node carries a load".to_string(),
        ));
    }
    if structure.supported_nodes().is_empty() {
        return Err(OptimizationError::InvalidStructure(
            "no active node is supported".to_string(),
        ));
    }
    if !loads_reach_supports(structure) {
        return Err(OptimizationError::InvalidStructure(
            "a loaded node has no path to a support".to_string(),
        ));
    }
    Ok(analyse(structure, solver)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{force, point};
    use crate::material::steel;
    use crate::structure::Support;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn validation_reports_missing_boundary_conditions() {
        let mut structure = Structure::new(steel());
        let a = structure.add_node(point(0.0, 0.0));
        let b = structure.add_node(point(1.0, 0.0));
        let c = structure.add_node(point(5.0, 0.0));
        structure.add_element(a, b, 1.0e-4).expect("valid element");
        let solver = LinearSolver::default();

        assert!(matches!(
            validate_for_optimization(&structure, &solver),
            Err(OptimizationError::InvalidStructure(_))
        ));
        structure.set_load(c, force(0.0, -1.0)).expect("known node");
        assert!(matches!(
            validate_for_optimization(&structure, &solver),
            Err(OptimizationError::InvalidStructure(_))
        ));
        structure.set_support(a, Support::Pinned).expect("known node");
        let error = validate_for_optimization(&structure, &solver).expect_err("no load path");
        assert_eq!(
            error,
            OptimizationError::InvalidStructure("a loaded node has no path to a support".into())
        );
    }

    #[test]
    fn termination_reasons_serialise_in_snake_case() {
        let text = serde_json::to_string(&TerminationReason::StressLimitReached).expect("json");
        assert_eq!(text, "\"stress_limit_reached\"");
        assert_eq!(TerminationReason::Converged.to_string(), "converged");
    }
}
