//! Global stiffness and lumped mass assembly.
//!
//! Every node keeps its two degrees of freedom `(2i, 2i + 1)` whether active or not; inactive
//! nodes simply contribute empty rows and columns.

use nalgebra::{DVector, Matrix4};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use petgraph::graph::EdgeIndex;

use crate::structure::{node_dofs, Structure};

/// Assemble the global stiffness matrix from the active elements using `E A / L`.
#[must_use]
pub fn stiffness_matrix(structure: &Structure) -> CsrMatrix<f64> {
    stiffness_matrix_with(structure, |element| structure.axial_stiffness(element))
}

/// Assemble the global stiffness matrix with a caller supplied axial stiffness per element.
///
/// The SIMP optimiser uses this to apply its penalised densities.
pub fn stiffness_matrix_with<F>(structure: &Structure, axial_stiffness: F) -> CsrMatrix<f64>
where
    F: Fn(EdgeIndex) -> f64,
{
    let dof = structure.dof_count();
    let mut coo = CooMatrix::new(dof, dof);
    for element in structure.active_elements() {
        let k = axial_stiffness(element);
        if k == 0.0 {
            continue;
        }
        let (Some((start, end)), Some(direction)) = (
            structure.endpoints(element),
            structure.element_direction(element),
        ) else {
            continue;
        };
        let local = element_stiffness(k, direction.x, direction.y);
        let [sx, sy] = node_dofs(start);
        let [ex, ey] = node_dofs(end);
        let dof_map = [sx, sy, ex, ey];
        for (row_local, global_row) in dof_map.iter().enumerate() {
            for (col_local, global_col) in dof_map.iter().enumerate() {
                coo.push(*global_row, *global_col, local[(row_local, col_local)]);
            }
        }
    }
    CsrMatrix::from(&coo)
}

/// 4x4 bar stiffness in global coordinates for direction cosines `(c, s)`.
fn element_stiffness(k: f64, c: f64, s: f64) -> Matrix4<f64> {
    let cc = c * c;
    let cs = c * s;
    let ss = s * s;
    k * Matrix4::new(
        cc, cs, -cc, -cs, //
        cs, ss, -cs, -ss, //
        -cc, -cs, cc, cs, //
        -cs, -ss, cs, ss,
    )
}

/// Diagonal of the lumped mass matrix.
///
/// Each active node receives half the mass of every active incident element, or its explicit
/// mass override. Active nodes that end up massless receive `fallback_mass`.
#[must_use]
pub fn lumped_mass(structure: &Structure, fallback_mass: f64) -> DVector<f64> {
    let mut mass = DVector::zeros(structure.dof_count());
    for node in structure.active_nodes() {
        let Some(weight) = structure.node(node) else {
            continue;
        };
        let value = weight.mass.unwrap_or_else(|| {
            let lumped: f64 = structure
                .active_incident_elements(node)
                .into_iter()
                .map(|element| 0.5 * structure.element_mass(element))
                .sum();
            if lumped > 0.0 {
                lumped
            } else {
                fallback_mass
            }
        });
        let [x, y] = node_dofs(node);
        mass[x] = value;
        mass[y] = value;
    }
    mass
}

/// Diagonal entries of a square sparse matrix.
#[must_use]
pub fn diagonal(matrix: &CsrMatrix<f64>) -> DVector<f64> {
    let mut diag = DVector::zeros(matrix.nrows());
    for (row, col, value) in matrix.triplet_iter() {
        if row == col {
            diag[row] += *value;
        }
    }
    diag
}

/// Sparse matrix-vector product `A x`.
#[must_use]
pub fn sparse_matvec(matrix: &CsrMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let row_offsets = matrix.row_offsets();
    let col_indices = matrix.col_indices();
    let values = matrix.values();
    let mut result = DVector::zeros(matrix.nrows());
    for row in 0..matrix.nrows() {
        let mut sum = 0.0;
        for idx in row_offsets[row]..row_offsets[row + 1] {
            sum += values[idx] * x[col_indices[idx]];
        }
        result[row] = sum;
    }
    result
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    use super::*;
    use crate::geometry::point;
    use crate::material::{steel, MaterialProperties};

    fn dense(matrix: &CsrMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(matrix.nrows(), matrix.ncols());
        for (row, col, value) in matrix.triplet_iter() {
            out[(row, col)] += *value;
        }
        out
    }

    #[test]
    fn horizontal_bar_contributes_axial_terms_only() {
        let material = MaterialProperties::new(100.0, 1.0, 1.0).expect("valid");
        let mut structure = Structure::new(material);
        let a = structure.add_node(point(0.0, 0.0));
        let b = structure.add_node(point(2.0, 0.0));
        structure.add_element(a, b, 0.5).expect("valid element");

        let k = dense(&stiffness_matrix(&structure));
        assert_relative_eq!(k[(0, 0)], 25.0);
        assert_relative_eq!(k[(0, 2)], -25.0);
        assert_relative_eq!(k[(1, 1)], 0.0);
        assert_relative_eq!(k, k.transpose());
    }

    #[test]
    fn inactive_nodes_keep_empty_rows() {
        let mut structure = Structure::new(steel());
        let a = structure.add_node(point(0.0, 0.0));
        let b = structure.add_node(point(1.0, 1.0));
        let c = structure.add_node(point(2.0, 0.0));
        structure.add_element(a, b, 1.0e-4).expect("valid element");
        structure.add_element(b, c, 1.0e-4).expect("valid element");
        structure.deactivate_nodes(&[c]);

        let k = stiffness_matrix(&structure);
        assert_eq!(k.nrows(), 6);
        let diag = diagonal(&k);
        assert!(diag[0] > 0.0);
        assert_relative_eq!(diag[4], 0.0);
        assert_relative_eq!(diag[5], 0.0);
    }

    #[test]
    fn lumped_mass_splits_element_mass_between_nodes() {
        let material = MaterialProperties::new(1.0, 1.0, 10.0).expect("valid");
        let mut structure = Structure::new(material);
        let a = structure.add_node(point(0.0, 0.0));
        let b = structure.add_node(point(3.0, 0.0));
        let c = structure.add_node(point(9.0, 9.0));
        structure.add_element(a, b, 2.0).expect("valid element");
        structure.set_node_mass(b, Some(7.0)).expect("known node");

        let mass = lumped_mass(&structure, 0.25);
        assert_relative_eq!(mass[0], 30.0);
        assert_relative_eq!(mass[1], 30.0);
        assert_relative_eq!(mass[2], 7.0);
        assert_relative_eq!(mass[4], 0.25);

        structure.deactivate_nodes(&[c]);
        assert_relative_eq!(lumped_mass(&structure, 0.25)[4], 0.0);
    }

    #[test]
    fn sparse_matvec_matches_dense_product() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, 2.0);
        coo.push(0, 1, 1.0);
        coo.push(1, 1, 3.0);
        coo.push(1, 1, 1.0);
        let csr = CsrMatrix::from(&coo);
        let x = DVector::from_vec(vec![1.0, 2.0]);
        assert_eq!(sparse_matvec(&csr, &x), DVector::from_vec(vec![4.0, 8.0]));
        assert_eq!(diagonal(&csr), DVector::from_vec(vec![2.0, 4.0]));
    }
}
