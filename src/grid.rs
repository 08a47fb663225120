//! Rectangular spring grids used as the ground structure for optimisation.

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, StructureEditError};
use crate::geometry::{point, Force};
use crate::material::MaterialProperties;
use crate::structure::{Structure, Support};

/// Dimensions of a rectangular ground structure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Number of node columns.
    pub nx: usize,
    /// Number of node rows.
    pub ny: usize,
    /// Overall width in metres.
    pub width: f64,
    /// Overall height in metres.
    pub height: f64,
    /// Cross-sectional area of every generated element in square metres.
    pub area: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            nx: 3,
            ny: 2,
            width: 2.0,
            height: 1.0,
            area: 1.0e-4,
        }
    }
}

impl GridSpec {
    /// Check the grid can be built.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for fewer than two rows or columns, or non-positive dimensions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nx < 2 {
            return Err(ConfigError::invalid("nx", "at least two columns are required"));
        }
        if self.ny < 2 {
            return Err(ConfigError::invalid("ny", "at least two rows are required"));
        }
        for (field, value) in [
            ("width", self.width),
            ("height", self.height),
            ("area", self.area),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be positive and finite (received {value})"),
                ));
            }
        }
        Ok(())
    }

    /// Index of the node in `row` (0 at the bottom) and `col` (0 at the left).
    #[must_use]
    pub fn node_at(&self, row: usize, col: usize) -> NodeIndex {
        NodeIndex::new(row * self.nx + col)
    }

    /// Build the grid, joining horizontal, vertical and both diagonal neighbours.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the dimensions are rejected by [`GridSpec::validate`].
    ///
    /// # Examples
    /// ```
    /// use trusstopo::{steel, GridSpec};
    ///
    /// let grid = GridSpec { nx: 3, ny: 2, ..GridSpec::default() };
    /// let structure = grid.build(steel()).expect("valid grid");
    /// assert_eq!(structure.node_count(), 6);
    /// assert_eq!(structure.element_count(), 11);
    /// ```
    pub fn build(&self, material: MaterialProperties) -> Result<Structure, ConfigError> {
        self.validate()?;
        let mut structure = Structure::new(material);
        let dx = self.width / (self.nx - 1) as f64;
        let dy = self.height / (self.ny - 1) as f64;
        for row in 0..self.ny {
            for col in 0..self.nx {
                structure.add_node(point(col as f64 * dx, row as f64 * dy));
            }
        }

        let mut pairs = Vec::new();
        for row in 0..self.ny {
            for col in 0..self.nx {
                if col + 1 < self.nx {
                    pairs.push(((row, col), (row, col + 1)));
                }
                if row + 1 < self.ny {
                    pairs.push(((row, col), (row + 1, col)));
                }
                if col + 1 < self.nx && row + 1 < self.ny {
                    pairs.push(((row, col), (row + 1, col + 1)));
                    pairs.push(((row, col + 1), (row + 1, col)));
                }
            }
        }
        for ((r0, c0), (r1, c1)) in pairs {
            structure
                .add_element(self.node_at(r0, c0), self.node_at(r1, c1), self.area)
                .map_err(|err| ConfigError::invalid("grid", err.to_string()))?;
        }
        Ok(structure)
    }

    /// Apply the simply supported beam case: bottom-left pinned, bottom-right on a roller and
    /// `load` at the top-middle node (column `nx / 2`).
    ///
    /// # Errors
    ///
    /// Returns [`StructureEditError`] when `structure` was not built from this grid.
    pub fn apply_simply_supported(
        &self,
        structure: &mut Structure,
        load: Force,
    ) -> Result<(), StructureEditError> {
        if structure.node_count() != self.nx * self.ny {
            return Err(StructureEditError::UnknownNode(self.node_at(
                self.ny - 1,
                self.nx - 1,
            )));
        }
        structure.set_support(self.node_at(0, 0), Support::Pinned)?;
        structure.set_support(self.node_at(0, self.nx - 1), Support::PinnedY)?;
        structure.set_load(self.node_at(self.ny - 1, self.nx / 2), load)?;
        Ok(())
    }
}

impl Structure {
    /// Build a rectangular ground structure; see [`GridSpec::build`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the grid dimensions are invalid.
    pub fn rectangular_grid(
        spec: &GridSpec,
        material: MaterialProperties,
    ) -> Result<Self, ConfigError> {
        spec.build(material)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::geometry::force;
    use crate::material::steel;

    #[test]
    fn grid_connects_all_neighbours() {
        let grid = GridSpec {
            nx: 4,
            ny: 3,
            ..GridSpec::default()
        };
        let structure = grid.build(steel()).expect("valid grid");
        // 3*3 horizontal, 4*2 vertical, 2 diagonals per cell
        assert_eq!(structure.element_count(), 9 + 8 + 2 * 6);
        let corner = structure.node(grid.node_at(2, 3)).expect("node exists");
        assert_relative_eq!(corner.position.x, 2.0);
        assert_relative_eq!(corner.position.y, 1.0);
    }

    #[test]
    fn invalid_dimensions_are_rejected() {
        let narrow = GridSpec {
            nx: 1,
            ..GridSpec::default()
        };
        assert!(matches!(
            narrow.validate(),
            Err(ConfigError::InvalidConfiguration { field: "nx", .. })
        ));
        let flat = GridSpec {
            height: -1.0,
            ..GridSpec::default()
        };
        assert!(matches!(
            flat.build(steel()),
            Err(ConfigError::InvalidConfiguration { field: "height", .. })
        ));
    }

    #[test]
    fn simply_supported_case_is_applied() {
        let grid = GridSpec::default();
        let mut structure = grid.build(steel()).expect("valid grid");
        grid.apply_simply_supported(&mut structure, force(0.0, -1000.0))
            .expect("grid matches");

        assert_eq!(
            structure.supported_nodes(),
            vec![NodeIndex::new(0), NodeIndex::new(2)]
        );
        assert_eq!(structure.loaded_nodes(), vec![NodeIndex::new(4)]);
    }
}
