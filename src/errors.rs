//! Error types produced while editing, solving or optimising structures.

use petgraph::graph::{EdgeIndex, NodeIndex};
use thiserror::Error;

/// Error returned when editing a [`Structure`](crate::Structure) with invalid input.
///
/// # Examples
///
/// ```
/// use petgraph::graph::NodeIndex;
/// use trusstopo::{point, steel, Structure, StructureEditError};
///
/// let mut structure = Structure::new(steel());
/// let a = structure.add_node(point(0.0, 0.0));
/// let missing = NodeIndex::new(7);
/// let error = structure
///     .add_element(a, missing, 1.0e-4)
///     .expect_err("unknown node is rejected");
/// assert_eq!(error, StructureEditError::UnknownNode(missing));
/// ```
#[derive(Debug, Error, PartialEq)]
pub enum StructureEditError {
    /// Returned when a node cannot be found in the structure.
    #[error("node {0:?} does not exist in this structure")]
    UnknownNode(NodeIndex),
    /// Returned when an element cannot be found in the structure.
    #[error("element {0:?} does not exist in this structure")]
    UnknownElement(EdgeIndex),
    /// Returned when two nodes are already joined by an element.
    #[error("nodes {0:?} and {1:?} are already connected")]
    DuplicateElement(NodeIndex, NodeIndex),
    /// Returned when an element would span zero distance.
    #[error("element between {0:?} and {1:?} has zero length")]
    ZeroLengthElement(NodeIndex, NodeIndex),
    /// Returned when the supplied element properties are invalid.
    #[error("{0}")]
    InvalidElement(ElementPropertyError),
}

/// Error returned when element properties are not physically meaningful.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum ElementPropertyError {
    /// Returned when the cross-sectional area is zero, negative or not finite.
    #[error("area must be positive (received {area})")]
    NonPositiveArea {
        /// Rejected cross-sectional area in square metres.
        area: f64,
    },
}

/// Error returned when material properties are rejected or cannot be found.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MaterialError {
    /// Returned when the elastic modulus is zero or negative.
    #[error("elastic modulus must be positive (received {0})")]
    NonPositiveElasticModulus(f64),
    /// Returned when the yield strength is zero or negative.
    #[error("yield strength must be positive (received {0})")]
    NonPositiveYieldStrength(f64),
    /// Returned when the density is negative.
    #[error("density must not be negative (received {0})")]
    NegativeDensity(f64),
    /// Returned when a material store has no entry under the requested name.
    #[error("material '{0}' is not known to the store")]
    UnknownMaterial(String),
}

/// Error returned when a static solve is numerically unreliable.
///
/// The solver never hands back a displacement field that fails its residual check, so every
/// variant here means "no solution" rather than "approximate solution".
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum SolveError {
    /// A free degree of freedom has no stiffness at all.
    #[error("degree of freedom {dof} has no stiffness; the structure is a mechanism")]
    SingularDof {
        /// Global index of the unrestrained degree of freedom.
        dof: usize,
    },
    /// The reduced stiffness is not positive definite; some free motion costs no energy.
    #[error("reduced stiffness is rank deficient; the structure is a mechanism")]
    RankDeficient,
    /// The relative residual of the best available solution exceeds the tolerance.
    #[error("relative residual {residual:.3e} exceeds tolerance {tolerance:.1e}")]
    Unreliable {
        /// Relative residual `|K u - F| / |F|`.
        residual: f64,
        /// Tolerance that was exceeded.
        tolerance: f64,
    },
    /// The iterative fallback did not converge.
    #[error("least-squares fallback did not converge within {iterations} iterations")]
    NoConvergence {
        /// Number of iterations performed.
        iterations: usize,
    },
    /// Matrix and vector sizes are inconsistent.
    #[error("stiffness matrix is {rows}x{cols} but the load vector has {len} entries")]
    DimensionMismatch {
        /// Number of matrix rows.
        rows: usize,
        /// Number of matrix columns.
        cols: usize,
        /// Length of the load vector.
        len: usize,
    },
}

/// Error returned when the generalized eigenproblem cannot be solved reliably.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum EigenError {
    /// Every degree of freedom is restrained.
    #[error("no free degrees of freedom")]
    NoFreeDofs,
    /// A free degree of freedom carries no mass.
    #[error("degree of freedom {dof} has no mass")]
    MissingMass {
        /// Global index of the massless degree of freedom.
        dof: usize,
    },
    /// The stiffness matrix is singular on the free degrees of freedom.
    #[error("stiffness matrix is singular on the free degrees of freedom")]
    Singular,
    /// The eigenpair does not satisfy the eigen equation to tolerance.
    #[error("eigenpair residual {residual:.3e} exceeds tolerance")]
    Unreliable {
        /// Relative residual `|K phi - lambda M phi| / |lambda M phi|`.
        residual: f64,
    },
}

/// Error returned for configuration values outside their valid range.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A configuration option is out of range.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfiguration {
        /// Name of the offending option.
        field: &'static str,
        /// Human readable description of the constraint.
        reason: String,
    },
}

impl ConfigError {
    /// Shorthand used by the `validate` implementations.
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }
}

/// Error returned when an optimisation run cannot start.
///
/// Terminal states such as reaching the stress limit are not errors; they are reported through
/// [`TerminationReason`](crate::TerminationReason).
#[derive(Debug, Error, PartialEq)]
pub enum OptimizationError {
    /// The configuration was rejected before the run.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The starting structure cannot be solved.
    #[error("initial structure cannot be solved: {0}")]
    Solve(#[from] SolveError),
    /// The starting structure is not a valid optimisation input.
    #[error("structure is not ready for optimization: {0}")]
    InvalidStructure(String),
}

/// Error returned when reading or writing structure documents.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Reading or writing the underlying file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing or formatting failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The document carries an unknown format tag.
    #[error("unsupported document format '{0}'")]
    UnsupportedFormat(String),
    /// Column arrays or references inside the document disagree.
    #[error("inconsistent document: {0}")]
    Inconsistent(String),
    /// The document describes an invalid structure.
    #[error(transparent)]
    Edit(#[from] StructureEditError),
    /// The document describes invalid material properties.
    #[error(transparent)]
    Material(#[from] MaterialError),
}
