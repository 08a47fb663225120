#![warn(clippy::all)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod analysis;
pub mod assembly;
pub mod codec;
pub mod config;
pub mod connectivity;
pub mod eigen;
pub mod errors;
pub mod geometry;
pub mod grid;
pub mod material;
pub mod optimizer;
pub mod rebuild;
pub mod solver;
pub mod structure;
pub mod symmetry;

pub use analysis::{analyse, StaticResponse};
pub use codec::{HistoryDocument, StructureDocument, STRUCTURE_FORMAT};
pub use config::{
    DynamicConfig, OptimizationConfig, PairPolicy, RebuildConfig, RemovalConfig, SimpConfig,
    SolverConfig, StressLimit,
};
pub use eigen::{EigenSolver, Mode};
pub use errors::{
    CodecError, ConfigError, EigenError, ElementPropertyError, MaterialError, OptimizationError,
    SolveError, StructureEditError,
};
pub use geometry::{force, point, Displacement, Force, Point};
pub use grid::GridSpec;
pub use material::{steel, MaterialLibrary, MaterialProperties, MaterialStore};
pub use optimizer::{
    validate_for_optimization, CancelToken, DynamicOptimizer, EigenRecord,
    EnergyBasedOptimizer, IterationRecord, OptimizationOutcome, OptimizationState, Optimizer,
    SimpOptimizer, Strategy, TerminationReason,
};
pub use rebuild::{RebuildOutcome, SupportRebuilder};
pub use solver::LinearSolver;
pub use structure::{Element, Node, Snapshot, Structure, Support};
pub use symmetry::Symmetry;
