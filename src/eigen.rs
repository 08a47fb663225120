//! Lowest vibration mode of the generalized problem `K phi = omega^2 M phi`.

use std::f64::consts::PI;

use log::debug;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use nalgebra_sparse::CsrMatrix;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::assembly::{lumped_mass, stiffness_matrix};
use crate::errors::EigenError;
use crate::structure::{node_dofs, Structure};

/// First eigenpair of a structure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mode {
    /// Eigenvalue `omega^2` in rad^2/s^2.
    pub eigenvalue: f64,
    /// Angular frequency `omega` in rad/s.
    pub angular_frequency: f64,
    /// Frequency `omega / 2 pi` in hertz.
    pub frequency: f64,
    /// Mass-normalised mode shape over all degrees of freedom; restrained entries are zero.
    pub shape: DVector<f64>,
}

impl Mode {
    /// Squared modal amplitude `phi_x^2 + phi_y^2` at a node.
    #[must_use]
    pub fn node_amplitude(&self, node: NodeIndex) -> f64 {
        let [x, y] = node_dofs(node);
        match (self.shape.get(x), self.shape.get(y)) {
            (Some(ux), Some(uy)) => ux * ux + uy * uy,
            _ => 0.0,
        }
    }
}

/// Dense symmetric eigen solver working on the mass-scaled reduced system.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EigenSolver {
    /// Largest accepted relative eigen residual.
    pub residual_tolerance: f64,
    /// Eigenvalues below this fraction of the largest one mark the system as singular.
    pub singular_ratio: f64,
}

impl Default for EigenSolver {
    fn default() -> Self {
        Self {
            residual_tolerance: 1.0e-6,
            singular_ratio: 1.0e-10,
        }
    }
}

impl EigenSolver {
    /// Assemble stiffness and lumped mass of `structure` and return its first mode.
    ///
    /// # Errors
    ///
    /// See [`EigenSolver::first_mode`].
    pub fn solve_structure(
        &self,
        structure: &Structure,
        fallback_mass: f64,
    ) -> Result<Mode, EigenError> {
        self.first_mode(
            &stiffness_matrix(structure),
            &lumped_mass(structure, fallback_mass),
            &structure.free_dofs(),
        )
    }

    /// Smallest positive eigenpair of `K phi = lambda M phi` on `free_dofs`.
    ///
    /// `mass` holds the diagonal of the lumped mass matrix.
    ///
    /// # Errors
    ///
    /// Returns [`EigenError`] when nothing is free, a free degree of freedom is massless, the
    /// stiffness is singular or the eigenpair fails its residual check.
    pub fn first_mode(
        &self,
        stiffness: &CsrMatrix<f64>,
        mass: &DVector<f64>,
        free_dofs: &[usize],
    ) -> Result<Mode, EigenError> {
        let n = free_dofs.len();
        if n == 0 {
            return Err(EigenError::NoFreeDofs);
        }
        if let Some(dof) = free_dofs.iter().find(|d| !(mass[**d] > 0.0)) {
            return Err(EigenError::MissingMass { dof: *dof });
        }

        let mut local = vec![None; stiffness.nrows()];
        for (idx, dof) in free_dofs.iter().enumerate() {
            local[*dof] = Some(idx);
        }
        let mut k_ff = DMatrix::zeros(n, n);
        for (row, col, value) in stiffness.triplet_iter() {
            if let (Some(r), Some(c)) = (local[row], local[col]) {
                k_ff[(r, c)] += *value;
            }
        }
        let m_ff = DVector::from_iterator(n, free_dofs.iter().map(|d| mass[*d]));
        let scale = m_ff.map(|m| 1.0 / m.sqrt());

        // A = M^-1/2 K M^-1/2 keeps the problem symmetric
        let mut scaled = k_ff.clone();
        for r in 0..n {
            for c in 0..n {
                scaled[(r, c)] *= scale[r] * scale[c];
            }
        }
        let eigen = SymmetricEigen::new(scaled);
        let (first, lambda_min) = eigen
            .eigenvalues
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (idx, value)| {
                if value < best.1 {
                    (idx, value)
                } else {
                    best
                }
            });
        let lambda_max = eigen.eigenvalues.max();
        if !(lambda_max > 0.0) || !(lambda_min > self.singular_ratio * lambda_max) {
            debug!("eigenvalues span [{lambda_min:.3e}, {lambda_max:.3e}]; stiffness is singular");
            return Err(EigenError::Singular);
        }

        let psi = eigen.eigenvectors.column(first);
        let mut phi = psi.component_mul(&scale);
        let pivot = phi.iamax();
        if phi[pivot] < 0.0 {
            phi.neg_mut();
        }

        let m_phi = phi.component_mul(&m_ff) * lambda_min;
        let residual = (&k_ff * &phi - &m_phi).norm() / m_phi.norm();
        if !(residual <= self.residual_tolerance) {
            return Err(EigenError::Unreliable { residual });
        }

        let mut shape = DVector::zeros(mass.len());
        for (idx, dof) in free_dofs.iter().enumerate() {
            shape[*dof] = phi[idx];
        }
        let angular_frequency = lambda_min.sqrt();
        Ok(Mode {
            eigenvalue: lambda_min,
            angular_frequency,
            frequency: angular_frequency / (2.0 * PI),
            shape,
        })
    }
}
