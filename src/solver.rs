//! Static equilibrium solver with a reliability guarantee.
//!
//! The reduced system `K_ff u_f = F_f` is scaled to a unit diagonal and factorised with a sparse
//! Cholesky decomposition. The unshifted factor decides whether the system is singular; the
//! solve itself uses the factor of the slightly regularised matrix. If the residual of that
//! solution is too large an LSQR iteration is tried instead. Whatever path produced the
//! displacements, they are only returned when the relative residual against the unregularised
//! stiffness passes the configured tolerance.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};

use crate::assembly::{diagonal, sparse_matvec, stiffness_matrix};
use crate::config::SolverConfig;
use crate::errors::SolveError;
use crate::structure::Structure;

/// Sparse direct solver with an iterative least-squares fallback.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LinearSolver {
    config: SolverConfig,
}

impl LinearSolver {
    /// Create a solver with explicit tolerances.
    #[must_use]
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Tolerances in use.
    #[must_use]
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Assemble and solve the structure under its own loads and supports.
    ///
    /// # Errors
    ///
    /// Returns [`SolveError`] whenever the reduced stiffness is singular or rank deficient, even
    /// if the loads do not excite the free motion, and when the solution is unreliable.
    ///
    /// # Examples
    /// ```
    /// use trusstopo::{force, point, steel, LinearSolver, Structure, Support};
    ///
    /// let mut structure = Structure::new(steel());
    /// let a = structure.add_node(point(0.0, 0.0));
    /// let b = structure.add_node(point(1.0, 0.0));
    /// structure.add_element(a, b, 1.0e-4).unwrap();
    /// structure.set_support(a, Support::Pinned).unwrap();
    /// structure.set_support(b, Support::PinnedY).unwrap();
    /// structure.set_load(b, force(21_000.0, 0.0)).unwrap();
    ///
    /// let u = LinearSolver::default().solve_structure(&structure).unwrap();
    /// assert!((u[2] - 1.0e-3).abs() < 1.0e-12);
    /// ```
    pub fn solve_structure(&self, structure: &Structure) -> Result<DVector<f64>, SolveError> {
        self.solve(
            &stiffness_matrix(structure),
            &structure.load_vector(),
            &structure.free_dofs(),
        )
    }

    /// Solve `K u = F` on `free_dofs`; every other degree of freedom is held at zero.
    ///
    /// # Errors
    ///
    /// Returns [`SolveError::DimensionMismatch`] for inconsistent sizes,
    /// [`SolveError::SingularDof`] or [`SolveError::RankDeficient`] when the reduced stiffness is
    /// not positive definite, whatever the load, and [`SolveError::Unreliable`] or
    /// [`SolveError::NoConvergence`] when no displacement field satisfies the residual check.
    pub fn solve(
        &self,
        stiffness: &CsrMatrix<f64>,
        load: &DVector<f64>,
        free_dofs: &[usize],
    ) -> Result<DVector<f64>, SolveError> {
        let n = load.len();
        if stiffness.nrows() != n || stiffness.ncols() != n {
            return Err(SolveError::DimensionMismatch {
                rows: stiffness.nrows(),
                cols: stiffness.ncols(),
                len: n,
            });
        }
        let mut displacements = DVector::zeros(n);
        if free_dofs.is_empty() {
            return Ok(displacements);
        }
        let reduced = reduce(stiffness, free_dofs);
        let diag = diagonal(&reduced);
        let max_diag = diag.max();
        if !(max_diag > 0.0) {
            return Err(SolveError::SingularDof { dof: free_dofs[0] });
        }
        let pivot_floor = self.config.singular_pivot * max_diag;
        if let Some(local) = diag.iter().position(|d| *d <= pivot_floor) {
            debug!("free dof {} has no stiffness", free_dofs[local]);
            return Err(SolveError::SingularDof {
                dof: free_dofs[local],
            });
        }

        let scale = diag.map(|d| 1.0 / d.sqrt());
        let scaled = scaled_stiffness(&reduced, &scale);
        let mut factor = CscCholesky::factor(&scaled).map_err(|_| {
            debug!("scaled stiffness is not positive definite");
            SolveError::RankDeficient
        })?;
        if let Some(local) = first_small_pivot(factor.l(), self.config.singular_pivot) {
            debug!("near-zero pivot at free dof {}", free_dofs[local]);
            return Err(SolveError::SingularDof {
                dof: free_dofs[local],
            });
        }

        let load_free = DVector::from_iterator(free_dofs.len(), free_dofs.iter().map(|d| load[*d]));
        let load_norm = load_free.norm();
        if load_norm == 0.0 {
            return Ok(displacements);
        }

        if self.config.regularization > 0.0 {
            let shifted = shifted_values(&scaled, self.config.regularization);
            factor
                .refactor(&shifted)
                .map_err(|_| SolveError::RankDeficient)?;
        }
        let rhs = load_free.component_mul(&scale);
        let scaled_solution = factor.solve(&DMatrix::from_column_slice(rhs.len(), 1, rhs.as_slice()));
        let candidate =
            DVector::from_column_slice(scaled_solution.as_slice()).component_mul(&scale);
        let residual = relative_residual(&reduced, &candidate, &load_free, load_norm);
        let solution = if residual <= self.config.residual_tolerance {
            candidate
        } else {
            warn!("cholesky residual {residual:.3e} too large, retrying with lsqr");
            self.least_squares(&reduced, &load_free, load_norm)?
        };

        for (local, dof) in free_dofs.iter().enumerate() {
            displacements[*dof] = solution[local];
        }
        Ok(displacements)
    }

    /// LSQR fallback followed by the residual check.
    fn least_squares(
        &self,
        reduced: &CsrMatrix<f64>,
        load: &DVector<f64>,
        load_norm: f64,
    ) -> Result<DVector<f64>, SolveError> {
        let (solution, iterations, converged) = lsqr(
            reduced,
            load,
            self.config.lsqr_tolerance,
            self.config.lsqr_max_iterations,
        );
        let residual = relative_residual(reduced, &solution, load, load_norm);
        if residual <= self.config.residual_tolerance {
            debug!("lsqr accepted after {iterations} iterations");
            return Ok(solution);
        }
        if converged {
            warn!("lsqr residual {residual:.3e} rejected");
            Err(SolveError::Unreliable {
                residual,
                tolerance: self.config.residual_tolerance,
            })
        } else {
            warn!("lsqr stopped after {iterations} iterations without converging");
            Err(SolveError::NoConvergence { iterations })
        }
    }
}

/// Restrict a global matrix to the rows and columns listed in `free_dofs`.
fn reduce(matrix: &CsrMatrix<f64>, free_dofs: &[usize]) -> CsrMatrix<f64> {
    let mut local = vec![None; matrix.nrows()];
    for (idx, dof) in free_dofs.iter().enumerate() {
        local[*dof] = Some(idx);
    }
    let mut coo = CooMatrix::new(free_dofs.len(), free_dofs.len());
    for (row, col, value) in matrix.triplet_iter() {
        if let (Some(r), Some(c)) = (local[row], local[col]) {
            coo.push(r, c, *value);
        }
    }
    CsrMatrix::from(&coo)
}

/// `S K S` with `S = diag(scale)`; with `scale = diag(K)^-1/2` every diagonal becomes one.
fn scaled_stiffness(reduced: &CsrMatrix<f64>, scale: &DVector<f64>) -> CscMatrix<f64> {
    let n = reduced.nrows();
    let mut coo = CooMatrix::new(n, n);
    for (row, col, value) in reduced.triplet_iter() {
        coo.push(row, col, value * scale[row] * scale[col]);
    }
    CscMatrix::from(&coo)
}

/// Values of `matrix + shift I` in the storage order of `matrix`.
fn shifted_values(matrix: &CscMatrix<f64>, shift: f64) -> Vec<f64> {
    let offsets = matrix.col_offsets();
    let rows = matrix.row_indices();
    let mut values = matrix.values().to_vec();
    for col in 0..matrix.ncols() {
        for idx in offsets[col]..offsets[col + 1] {
            if rows[idx] == col {
                values[idx] += shift;
            }
        }
    }
    values
}

/// First row whose squared Cholesky pivot does not exceed `floor`.
fn first_small_pivot(l: &CscMatrix<f64>, floor: f64) -> Option<usize> {
    l.triplet_iter()
        .filter(|(row, col, _)| row == col)
        .find(|(_, _, value)| **value * **value <= floor)
        .map(|(row, _, _)| row)
}

fn relative_residual(
    matrix: &CsrMatrix<f64>,
    solution: &DVector<f64>,
    load: &DVector<f64>,
    load_norm: f64,
) -> f64 {
    if solution.iter().any(|v| !v.is_finite()) {
        return f64::INFINITY;
    }
    (sparse_matvec(matrix, solution) - load).norm() / load_norm
}

/// LSQR (Paige and Saunders) for a symmetric matrix.
///
/// Returns the iterate, the number of iterations and whether the residual estimate reached
/// `tolerance * |b|`.
fn lsqr(
    matrix: &CsrMatrix<f64>,
    rhs: &DVector<f64>,
    tolerance: f64,
    max_iterations: usize,
) -> (DVector<f64>, usize, bool) {
    let n = rhs.len();
    let mut x = DVector::zeros(n);
    let rhs_norm = rhs.norm();
    let mut beta = rhs_norm;
    if beta == 0.0 {
        return (x, 0, true);
    }
    let mut u = rhs / beta;
    let mut v = sparse_matvec(matrix, &u);
    let mut alpha = v.norm();
    if alpha == 0.0 {
        return (x, 0, false);
    }
    v /= alpha;
    let mut w = v.clone();
    let mut phi_bar = beta;
    let mut rho_bar = alpha;

    for iteration in 1..=max_iterations {
        u = sparse_matvec(matrix, &v) - &u * alpha;
        beta = u.norm();
        if beta > 0.0 {
            u /= beta;
        }
        v = sparse_matvec(matrix, &u) - &v * beta;
        alpha = v.norm();
        if alpha > 0.0 {
            v /= alpha;
        }

        let rho = rho_bar.hypot(beta);
        let c = rho_bar / rho;
        let s = beta / rho;
        let theta = s * alpha;
        rho_bar = -c * alpha;
        let phi = c * phi_bar;
        phi_bar *= s;

        x += &w * (phi / rho);
        w = &v - &w * (theta / rho);

        if phi_bar <= tolerance * rhs_norm {
            return (x, iteration, true);
        }
        // the normal-equation residual vanished: x is a least-squares solution
        if phi_bar * alpha * c.abs() <= tolerance * rhs_norm || alpha == 0.0 || beta == 0.0 {
            return (x, iteration, true);
        }
    }
    (x, max_iterations, false)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::geometry::{force, point};
    use crate::material::MaterialProperties;
    use crate::structure::Support;

    fn unit_material() -> MaterialProperties {
        MaterialProperties::new(1000.0, 10.0, 1.0).expect("valid material")
    }

    /// Two bars meeting at a loaded apex above two pinned supports.
    fn two_bar_truss() -> Structure {
        let mut structure = Structure::new(unit_material());
        let a = structure.add_node(point(0.0, 0.0));
        let b = structure.add_node(point(2.0, 0.0));
        let c = structure.add_node(point(1.0, 1.0));
        structure.add_element(a, c, 1.0).expect("valid element");
        structure.add_element(b, c, 1.0).expect("valid element");
        structure.set_support(a, Support::Pinned).expect("known node");
        structure.set_support(b, Support::Pinned).expect("known node");
        structure.set_load(c, force(0.0, -10.0)).expect("known node");
        structure
    }

    #[test]
    fn two_bar_truss_matches_hand_calculation() {
        let structure = two_bar_truss();
        let u = LinearSolver::default()
            .solve_structure(&structure)
            .expect("well posed");
        // each bar: k = E A / L = 1000 / sqrt(2); vertical stiffness 2 k sin^2 = k
        let k = 1000.0 / 2.0_f64.sqrt();
        assert_relative_eq!(u[5], -10.0 / k, max_relative = 1.0e-9);
        assert_relative_eq!(u[4], 0.0, epsilon = 1.0e-12);
        assert_eq!(&u.as_slice()[..4], &[0.0; 4]);
    }

    #[test]
    fn residual_is_below_tolerance_for_well_posed_system() {
        let structure = two_bar_truss();
        let k = stiffness_matrix(&structure);
        let u = LinearSolver::default()
            .solve_structure(&structure)
            .expect("well posed");
        let free = structure.free_dofs();
        let ku = sparse_matvec(&k, &u);
        let load = structure.load_vector();
        let residual: f64 = free
            .iter()
            .map(|d| (ku[*d] - load[*d]).powi(2))
            .sum::<f64>()
            .sqrt();
        assert!(residual / load.norm() < 1.0e-6);
    }

    #[test]
    fn mechanism_is_rejected() {
        let mut structure = Structure::new(unit_material());
        let a = structure.add_node(point(0.0, 0.0));
        let b = structure.add_node(point(1.0, 0.0));
        let c = structure.add_node(point(1.0, 1.0));
        let d = structure.add_node(point(0.0, 1.0));
        for (start, end) in [(a, b), (b, c), (c, d), (d, a)] {
            structure.add_element(start, end, 1.0).expect("valid element");
        }
        structure.set_support(a, Support::Pinned).expect("known node");
        structure.set_support(b, Support::Pinned).expect("known node");
        structure.set_load(d, force(1.0, 0.0)).expect("known node");

        assert!(LinearSolver::default().solve_structure(&structure).is_err());
    }

    /// Pinned posts joined by a top chord without diagonals; the chord can sway sideways.
    fn sway_frame(bays: usize) -> Structure {
        let mut structure = Structure::new(unit_material());
        let mut previous = None;
        for i in 0..=bays {
            let x = i as f64;
            let foot = structure.add_node(point(x, 0.0));
            let head = structure.add_node(point(x, 1.0));
            structure.add_element(foot, head, 1.0).expect("valid element");
            structure.set_support(foot, Support::Pinned).expect("known node");
            structure.set_load(head, force(0.0, -1.0e3)).expect("known node");
            if let Some(left) = previous {
                structure.add_element(left, head, 1.0).expect("valid element");
            }
            previous = Some(head);
        }
        structure
    }

    #[test]
    fn wide_sway_mode_is_rejected_when_loads_leave_it_unexcited() {
        let structure = sway_frame(12);
        assert!(LinearSolver::default().solve_structure(&structure).is_err());

        let relaxed = SolverConfig {
            regularization: 1.0e-15,
            singular_pivot: 1.0e-12,
            ..SolverConfig::default()
        };
        assert!(LinearSolver::new(relaxed).solve_structure(&structure).is_err());
    }

    #[test]
    fn braced_frame_is_accepted() {
        let mut structure = sway_frame(12);
        let foot = petgraph::graph::NodeIndex::new(0);
        let head = petgraph::graph::NodeIndex::new(3);
        structure.add_element(foot, head, 1.0).expect("valid element");

        let u = LinearSolver::default()
            .solve_structure(&structure)
            .expect("braced frame");
        // every post shortens by F L / E A
        assert_relative_eq!(u[3], -1.0, max_relative = 1.0e-6);
    }

    #[test]
    fn unloaded_mechanism_is_still_rejected() {
        let mut structure = sway_frame(2);
        for head in [1, 3, 5] {
            structure
                .set_load(petgraph::graph::NodeIndex::new(head), force(0.0, 0.0))
                .expect("known node");
        }
        assert!(LinearSolver::default().solve_structure(&structure).is_err());
    }

    #[test]
    fn unsupported_dof_is_reported() {
        let mut structure = Structure::new(unit_material());
        let a = structure.add_node(point(0.0, 0.0));
        let b = structure.add_node(point(1.0, 0.0));
        let c = structure.add_node(point(2.0, 0.0));
        structure.add_element(a, b, 1.0).expect("valid element");
        structure.add_element(b, c, 1.0).expect("valid element");
        structure.set_support(a, Support::Pinned).expect("known node");
        structure.set_support(c, Support::Pinned).expect("known node");
        structure.set_load(b, force(0.0, -1.0)).expect("known node");

        assert_eq!(
            LinearSolver::default().solve_structure(&structure),
            Err(SolveError::SingularDof { dof: 3 })
        );
    }

    #[test]
    fn zero_load_gives_zero_displacements() {
        let mut structure = two_bar_truss();
        structure
            .set_load(petgraph::graph::NodeIndex::new(2), force(0.0, 0.0))
            .expect("known node");
        let u = LinearSolver::default()
            .solve_structure(&structure)
            .expect("trivial system");
        assert_eq!(u, DVector::zeros(6));
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let structure = two_bar_truss();
        let k = stiffness_matrix(&structure);
        let load = DVector::zeros(4);
        assert_eq!(
            LinearSolver::default().solve(&k, &load, &[0]),
            Err(SolveError::DimensionMismatch {
                rows: 6,
                cols: 6,
                len: 4
            })
        );
    }

    #[test]
    fn lsqr_solves_spd_system() {
        let mut coo = CooMatrix::new(3, 3);
        for (row, col, value) in [
            (0, 0, 4.0),
            (0, 1, 1.0),
            (1, 0, 1.0),
            (1, 1, 3.0),
            (1, 2, -1.0),
            (2, 1, -1.0),
            (2, 2, 2.0),
        ] {
            coo.push(row, col, value);
        }
        let matrix = CsrMatrix::from(&coo);
        let rhs = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let (x, _, converged) = lsqr(&matrix, &rhs, 1.0e-14, 100);
        assert!(converged);
        assert_relative_eq!(sparse_matvec(&matrix, &x), rhs, epsilon = 1.0e-10);
    }
}
