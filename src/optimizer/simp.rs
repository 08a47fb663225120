use log::{debug, info, warn};
use nalgebra::DVector;
use petgraph::graph::EdgeIndex;

use super::{
    validate_for_optimization, CancelToken, OptimizationOutcome, OptimizationState,
    TerminationReason,
};
use crate::analysis::{analyse, StaticResponse};
use crate::assembly::stiffness_matrix_with;
use crate::config::{SimpConfig, SolverConfig};
use crate::connectivity::{loads_reach_supports, prune_dead_material};
use crate::errors::{OptimizationError, SolveError};
use crate::solver::LinearSolver;
use crate::structure::Structure;

/// Consecutive failed solves tolerated before the run gives up.
const MAX_SOLVE_RETRIES: usize = 3;
/// Smallest move limit used when retrying after a failed solve.
const MIN_MOVE_LIMIT: f64 = 0.01;

/// Density-based sizing optimisation (SIMP) with an optimality criteria update.
///
/// Each active element carries a density `rho = A / A_max`. Stiffness is penalised as
/// `rho^p E A_max / L`, which drives densities towards zero or one while the total volume is
/// held at the target fraction.
#[derive(Clone, Debug, Default)]
pub struct SimpOptimizer {
    config: SimpConfig,
    solver: SolverConfig,
    cancel: CancelToken,
}

impl SimpOptimizer {
    /// Create an optimiser.
    #[must_use]
    pub fn new(config: SimpConfig, solver: SolverConfig) -> Self {
        Self {
            config,
            solver,
            cancel: CancelToken::new(),
        }
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Optimise the densities of a private copy of `structure`, then threshold the result.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizationError`] when the configuration is invalid or the starting structure
    /// is rejected.
    pub fn run(&self, structure: &Structure) -> Result<OptimizationOutcome, OptimizationError> {
        self.config.validate()?;
        self.solver.validate()?;
        let nominal = LinearSolver::new(self.solver);
        let working = structure.clone();
        let response = validate_for_optimization(&working, &nominal)?;
        let penalised = LinearSolver::new(self.penalised_solver_config());

        let elements = working.active_elements();
        let lengths: Vec<f64> = working
            .element_indices()
            .map(|e| working.element_length(e).unwrap_or(0.0))
            .collect();
        let area_max = elements
            .iter()
            .filter_map(|e| working.element(*e).map(|element| element.area))
            .fold(0.0, f64::max);
        let total_length: f64 = elements.iter().map(|e| lengths[e.index()]).sum();
        let target_volume = self.config.volume_fraction * total_length;

        let mut state = OptimizationState::new(working, response);
        // fractions are measured against the fully dense design
        state.initial_volume = area_max * total_length;
        let mut densities = vec![0.0; state.structure.element_count()];
        for element in &elements {
            densities[element.index()] = self.config.volume_fraction;
        }
        write_areas(&mut state.structure, &elements, &densities, area_max)?;

        let mut history = Vec::new();
        let mut previous: Option<Vec<f64>> = None;
        let mut move_limit = self.config.move_limit;
        let mut failures = 0;
        let mut previous_compliance = f64::INFINITY;

        let termination = loop {
            if self.cancel.is_cancelled() {
                break TerminationReason::Cancelled;
            }
            let solved = self.solve_penalised(&state.structure, &penalised, &densities, area_max);
            let response = match solved {
                Ok(response) => response,
                Err(err) => {
                    failures += 1;
                    warn!("penalised solve failed ({err}), attempt {failures}");
                    match previous.take() {
                        Some(earlier) if failures <= MAX_SOLVE_RETRIES => {
                            densities = earlier;
                            write_areas(&mut state.structure, &elements, &densities, area_max)?;
                            move_limit = (0.5 * move_limit).max(MIN_MOVE_LIMIT);
                            continue;
                        }
                        _ => break TerminationReason::SolveFailed,
                    }
                }
            };
            failures = 0;
            let compliance = response.compliance;
            state.response = response;
            let mut record = state.record(Vec::new(), None);
            record.densities = Some(densities.clone());
            history.push(record);

            let sensitivities = self.sensitivities(
                &state.structure,
                &elements,
                &densities,
                &lengths,
                &state.response.displacements,
            );
            let updated = self.optimality_update(
                &elements,
                &densities,
                &sensitivities,
                &lengths,
                target_volume,
                move_limit,
            );
            let change = elements
                .iter()
                .map(|e| (updated[e.index()] - densities[e.index()]).abs())
                .fold(0.0, f64::max);
            let relative = if previous_compliance.is_finite() {
                (compliance - previous_compliance).abs() / previous_compliance.abs().max(1.0e-20)
            } else {
                f64::INFINITY
            };
            info!(
                "simp iteration {}: compliance {compliance:.4e}, volume fraction {:.4}, change {change:.3e}",
                state.iteration,
                state.mass_fraction()
            );

            previous = Some(std::mem::replace(&mut densities, updated));
            previous_compliance = compliance;
            write_areas(&mut state.structure, &elements, &densities, area_max)?;
            state.iteration += 1;

            let settled = relative < self.config.tolerance && change < self.config.tolerance;
            if state.iteration > 5 && settled {
                break TerminationReason::Converged;
            }
            if state.iteration >= self.config.max_iterations {
                break TerminationReason::MaxIterations;
            }
        };

        if termination != TerminationReason::SolveFailed {
            let removed = self.threshold(&mut state.structure, &densities, &nominal);
            for element in state.structure.element_indices() {
                if !state.structure.is_element_active(element) {
                    densities[element.index()] = 0.0;
                }
            }
            match self.solve_penalised(&state.structure, &penalised, &densities, area_max) {
                Ok(response) => {
                    state.response = response;
                    let removed_nodes = structure
                        .node_indices()
                        .filter(|node| {
                            structure.is_node_active(*node)
                                && !state.structure.is_node_active(*node)
                        })
                        .map(|node| node.index())
                        .collect();
                    let mut record = state.record(removed_nodes, None);
                    record.densities = Some(densities);
                    history.push(record);
                    info!("thresholding removed {removed} elements");
                }
                Err(err) => warn!("final design could not be solved: {err}"),
            }
        }

        info!("simp finished after {} iterations: {termination}", state.iteration);
        state.termination = Some(termination);
        Ok(OptimizationOutcome {
            structure: state.structure,
            history,
            termination,
        })
    }

    /// Solver tolerances that still accept elements at the minimum density.
    fn penalised_solver_config(&self) -> SolverConfig {
        let floor = self.config.min_density.powf(self.config.penalization);
        SolverConfig {
            regularization: self.solver.regularization.min(floor * 1.0e-6),
            singular_pivot: self.solver.singular_pivot.min(floor * 1.0e-3),
            ..self.solver
        }
    }

    fn solve_penalised(
        &self,
        structure: &Structure,
        solver: &LinearSolver,
        densities: &[f64],
        area_max: f64,
    ) -> Result<StaticResponse, SolveError> {
        let modulus = structure.material().elastic_modulus;
        let penalty = self.config.penalization;
        let stiffness = |element: EdgeIndex| {
            let length = structure.element_length(element).unwrap_or(0.0);
            if length > 0.0 {
                densities[element.index()].powf(penalty) * modulus * area_max / length
            } else {
                0.0
            }
        };
        let matrix = stiffness_matrix_with(structure, stiffness);
        let displacements =
            solver.solve(&matrix, &structure.load_vector(), &structure.free_dofs())?;
        Ok(StaticResponse::with_stiffness(
            structure,
            displacements,
            stiffness,
        ))
    }

    /// Compliance sensitivity `dc/dA = -p rho^(p-1) E du^2 / L` per element.
    fn sensitivities(
        &self,
        structure: &Structure,
        elements: &[EdgeIndex],
        densities: &[f64],
        lengths: &[f64],
        displacements: &DVector<f64>,
    ) -> Vec<f64> {
        let modulus = structure.material().elastic_modulus;
        let penalty = self.config.penalization;
        let mut sensitivities = vec![0.0; densities.len()];
        for element in elements {
            let idx = element.index();
            let extension = structure.axial_extension(*element, displacements);
            sensitivities[idx] = -penalty
                * densities[idx].powf(penalty - 1.0)
                * modulus
                * extension
                * extension
                / lengths[idx];
        }
        sensitivities
    }

    /// Optimality criteria update with a bisected Lagrange multiplier.
    fn optimality_update(
        &self,
        elements: &[EdgeIndex],
        densities: &[f64],
        sensitivities: &[f64],
        lengths: &[f64],
        target_volume: f64,
        move_limit: f64,
    ) -> Vec<f64> {
        let damping = self.config.damping;
        let min_density = self.config.min_density;
        let update = |lambda: f64| {
            let mut next = densities.to_vec();
            for element in elements {
                let idx = element.index();
                let ratio = -sensitivities[idx] / (lambda * lengths[idx]);
                let candidate = if ratio > 0.0 {
                    densities[idx] * ratio.powf(damping)
                } else {
                    0.0
                };
                let lower = min_density.max(densities[idx] - move_limit);
                let upper = (densities[idx] + move_limit).min(1.0);
                next[idx] = candidate.clamp(lower, upper);
            }
            next
        };
        let volume = |next: &[f64]| -> f64 {
            elements
                .iter()
                .map(|e| next[e.index()] * lengths[e.index()])
                .sum()
        };

        let (mut low, mut high) = (1.0e-30_f64, 1.0e30_f64);
        let mut next = update((low * high).sqrt());
        for _ in 0..200 {
            let mid = (low * high).sqrt();
            next = update(mid);
            if volume(&next) > target_volume {
                low = mid;
            } else {
                high = mid;
            }
            if high / low < 1.0 + 1.0e-10 {
                break;
            }
        }
        next
    }

    /// Remove elements whose density ended below the threshold.
    ///
    /// All of them are removed at once when the result stays connected and solvable; otherwise
    /// they are tried one by one. Returns the number of removed elements.
    fn threshold(&self, structure: &mut Structure, densities: &[f64], solver: &LinearSolver) -> usize {
        let mut thin: Vec<EdgeIndex> = structure
            .active_elements()
            .into_iter()
            .filter(|e| densities[e.index()] < self.config.threshold)
            .collect();
        if thin.is_empty() {
            return 0;
        }
        thin.sort_by(|a, b| densities[a.index()].total_cmp(&densities[b.index()]));

        let before = structure.snapshot();
        if try_deactivate(structure, &thin, solver) {
            return thin.len();
        }
        structure.restore(&before);
        debug!("batch threshold rejected, trying {} elements one by one", thin.len());

        let mut removed = 0;
        for element in thin {
            let step = structure.snapshot();
            if structure.is_element_active(element) && try_deactivate(structure, &[element], solver) {
                removed += 1;
            } else {
                structure.restore(&step);
            }
        }
        if removed == 0 {
            structure.restore(&before);
        }
        removed
    }
}

fn try_deactivate(structure: &mut Structure, elements: &[EdgeIndex], solver: &LinearSolver) -> bool {
    for element in elements {
        if structure.set_element_active(*element, false).is_err() {
            return false;
        }
    }
    prune_dead_material(structure);
    loads_reach_supports(structure) && analyse(structure, solver).is_ok()
}

fn write_areas(
    structure: &mut Structure,
    elements: &[EdgeIndex],
    densities: &[f64],
    area_max: f64,
) -> Result<(), OptimizationError> {
    for element in elements {
        structure
            .set_area(*element, densities[element.index()] * area_max)
            .map_err(|err| OptimizationError::InvalidStructure(err.to_string()))?;
    }
    Ok(())
}
