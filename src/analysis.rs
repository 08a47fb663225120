//! Element and node response derived from a solved displacement field.

use nalgebra::DVector;
use petgraph::graph::{EdgeIndex, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::errors::SolveError;
use crate::geometry::Displacement;
use crate::solver::LinearSolver;
use crate::structure::{node_dofs, Structure};

/// Static response of a structure under its loads.
///
/// Per-element vectors are indexed by element index and hold zero for inactive elements.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticResponse {
    /// Global displacement vector `(ux, uy)` per node.
    pub displacements: DVector<f64>,
    /// Strain energy `k (du)^2 / 2` per element in joules.
    pub element_energy: Vec<f64>,
    /// Axial force per element in newtons, tension positive.
    pub element_force: Vec<f64>,
    /// Axial stress per element in pascals, tension positive.
    pub element_stress: Vec<f64>,
    /// Compliance `u^T K u`.
    pub compliance: f64,
}

impl StaticResponse {
    /// Evaluate element results with the nominal `E A / L` stiffness.
    #[must_use]
    pub fn new(structure: &Structure, displacements: DVector<f64>) -> Self {
        Self::with_stiffness(structure, displacements, |element| {
            structure.axial_stiffness(element)
        })
    }

    /// Evaluate element results with a caller supplied axial stiffness.
    pub fn with_stiffness<F>(
        structure: &Structure,
        displacements: DVector<f64>,
        axial_stiffness: F,
    ) -> Self
    where
        F: Fn(EdgeIndex) -> f64,
    {
        let count = structure.element_count();
        let mut element_energy = vec![0.0; count];
        let mut element_force = vec![0.0; count];
        let mut element_stress = vec![0.0; count];
        let mut compliance = 0.0;
        for element in structure.active_elements() {
            let k = axial_stiffness(element);
            let extension = structure.axial_extension(element, &displacements);
            let force = k * extension;
            let area = structure.element(element).map_or(0.0, |e| e.area);
            let idx = element.index();
            element_energy[idx] = 0.5 * k * extension * extension;
            element_force[idx] = force;
            element_stress[idx] = if area > 0.0 { force / area } else { 0.0 };
            compliance += k * extension * extension;
        }
        Self {
            displacements,
            element_energy,
            element_force,
            element_stress,
            compliance,
        }
    }

    /// Largest absolute element stress.
    #[must_use]
    pub fn max_stress(&self) -> f64 {
        self.element_stress
            .iter()
            .fold(0.0, |acc: f64, stress| acc.max(stress.abs()))
    }

    /// Displacement of a single node.
    #[must_use]
    pub fn node_displacement(&self, node: NodeIndex) -> Displacement {
        let [x, y] = node_dofs(node);
        match (self.displacements.get(x), self.displacements.get(y)) {
            (Some(ux), Some(uy)) => Displacement::new(*ux, *uy),
            _ => Displacement::default(),
        }
    }

    /// Displacements of every node in index order.
    #[must_use]
    pub fn node_displacements(&self) -> Vec<Displacement> {
        (0..self.displacements.len() / 2)
            .map(|i| self.node_displacement(NodeIndex::new(i)))
            .collect()
    }

    /// Strain energy attributed to each node: half the energy of every active incident element.
    ///
    /// The result is indexed by node index and zero for inactive nodes.
    #[must_use]
    pub fn node_energy(&self, structure: &Structure) -> Vec<f64> {
        let mut scores = vec![0.0; structure.node_count()];
        for node in structure.active_nodes() {
            scores[node.index()] = structure
                .active_incident_elements(node)
                .into_iter()
                .map(|element| 0.5 * self.element_energy[element.index()])
                .sum();
        }
        scores
    }
}

/// Solve a structure and evaluate its static response.
///
/// # Errors
///
/// Propagates [`SolveError`] from the solver.
pub fn analyse(structure: &Structure, solver: &LinearSolver) -> Result<StaticResponse, SolveError> {
    let displacements = solver.solve_structure(structure)?;
    Ok(StaticResponse::new(structure, displacements))
}
