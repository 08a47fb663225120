//! Serde configuration for solvers, optimisers and the support rebuilder.
//!
//! Every struct has sensible defaults and a `validate` method that rejects out-of-range values
//! before a run starts.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{CodecError, ConfigError};

fn check_unit_open(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("must lie in (0, 1] (received {value})"),
        ))
    }
}

fn check_unit_closed(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("must lie in [0, 1] (received {value})"),
        ))
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("must be positive (received {value})"),
        ))
    }
}

fn check_nonzero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(field, "must be at least 1"))
    } else {
        Ok(())
    }
}

/// Tolerances of the static solver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Largest accepted relative residual `|K u - F| / |F|`.
    pub residual_tolerance: f64,
    /// Diagonal shift applied to the unit-diagonal scaled stiffness before the solve.
    pub regularization: f64,
    /// Free diagonals below this fraction of the largest diagonal, and squared Cholesky pivots
    /// of the unshifted unit-diagonal stiffness below this value, mark the system as singular.
    pub singular_pivot: f64,
    /// Stopping tolerance of the least-squares fallback.
    pub lsqr_tolerance: f64,
    /// Iteration budget of the least-squares fallback.
    pub lsqr_max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            residual_tolerance: 1.0e-6,
            regularization: 1.0e-12,
            singular_pivot: 1.0e-11,
            lsqr_tolerance: 1.0e-14,
            lsqr_max_iterations: 20_000,
        }
    }
}

impl SolverConfig {
    /// Validate the tolerances.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for non-positive tolerances or an empty iteration budget.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("residual_tolerance", self.residual_tolerance)?;
        if !(self.regularization >= 0.0 && self.regularization < 1.0e-3) {
            return Err(ConfigError::invalid(
                "regularization",
                format!("must lie in [0, 1e-3) (received {})", self.regularization),
            ));
        }
        if !(self.singular_pivot > self.regularization && self.singular_pivot < 1.0) {
            return Err(ConfigError::invalid(
                "singular_pivot",
                format!(
                    "must lie between the regularization and 1 (received {})",
                    self.singular_pivot
                ),
            ));
        }
        check_positive("lsqr_tolerance", self.lsqr_tolerance)?;
        check_nonzero("lsqr_max_iterations", self.lsqr_max_iterations)
    }
}

/// How mirror pairs with exactly one protected member are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairPolicy {
    /// The pair is removed atomically or not at all, so it is skipped.
    #[default]
    Atomic,
    /// The unprotected member may be removed on its own.
    Split,
}

/// Optional stress constraint for the removal optimisers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StressLimit {
    /// Allowable stress is the yield strength divided by this factor.
    pub safety_factor: f64,
}

impl StressLimit {
    /// Allowable stress in pascals for a yield strength.
    #[must_use]
    pub fn allowable(&self, yield_strength: f64) -> f64 {
        yield_strength / self.safety_factor
    }
}

impl Default for StressLimit {
    fn default() -> Self {
        Self { safety_factor: 1.4 }
    }
}

/// Options shared by the static and dynamic removal optimisers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalConfig {
    /// Stop once the active mass falls to this fraction of the starting mass.
    pub target_mass_fraction: f64,
    /// Fraction of active nodes removed per iteration once fully ramped.
    pub removal_rate: f64,
    /// Share of the removal rate applied in the first iteration.
    pub ramp_start: f64,
    /// Number of iterations over which the rate ramps up to its full value.
    pub ramp_iterations: usize,
    /// Iteration budget.
    pub max_iterations: usize,
    /// Optional stress constraint.
    pub stress_limit: Option<StressLimit>,
    /// Treatment of partially protected mirror pairs.
    pub pair_policy: PairPolicy,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            target_mass_fraction: 0.5,
            removal_rate: 0.05,
            ramp_start: 0.3,
            ramp_iterations: 10,
            max_iterations: 200,
            stress_limit: None,
            pair_policy: PairPolicy::Atomic,
        }
    }
}

impl RemovalConfig {
    /// Validate the removal options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for fractions outside their ranges, a safety factor below one or an
    /// empty iteration budget.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_open("target_mass_fraction", self.target_mass_fraction)?;
        if !(self.removal_rate > 0.0 && self.removal_rate < 1.0) {
            return Err(ConfigError::invalid(
                "removal_rate",
                format!("must lie in (0, 1) (received {})", self.removal_rate),
            ));
        }
        check_unit_open("ramp_start", self.ramp_start)?;
        check_nonzero("max_iterations", self.max_iterations)?;
        if let Some(limit) = self.stress_limit {
            if !(limit.safety_factor >= 1.0 && limit.safety_factor.is_finite()) {
                return Err(ConfigError::invalid(
                    "safety_factor",
                    format!("must be at least 1 (received {})", limit.safety_factor),
                ));
            }
        }
        Ok(())
    }

    /// Effective removal fraction for a zero-based iteration index.
    #[must_use]
    pub fn effective_rate(&self, iteration: usize) -> f64 {
        if self.ramp_iterations == 0 {
            return self.removal_rate;
        }
        let progress = (iteration as f64 / self.ramp_iterations as f64).min(1.0);
        self.removal_rate * (self.ramp_start + (1.0 - self.ramp_start) * progress)
    }

    /// Number of nodes to remove from `active` nodes in a zero-based iteration.
    #[must_use]
    pub fn removal_count(&self, active: usize, iteration: usize) -> usize {
        ((active as f64 * self.effective_rate(iteration)).floor() as usize).max(1)
    }
}

/// Options specific to the eigenfrequency-aware optimiser.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicConfig {
    /// Weight of the dynamic importance in the blended score.
    pub alpha: f64,
    /// Excitation angular frequency in rad/s the first mode should move away from.
    pub excitation_frequency: f64,
    /// Mass in kilograms assigned to active nodes without element mass.
    pub fallback_node_mass: f64,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            excitation_frequency: 10.0,
            fallback_node_mass: 1.0,
        }
    }
}

impl DynamicConfig {
    /// Validate the dynamic options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when alpha leaves `[0, 1]`, the excitation is negative or the
    /// fallback mass is not positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_closed("alpha", self.alpha)?;
        if !(self.excitation_frequency >= 0.0 && self.excitation_frequency.is_finite()) {
            return Err(ConfigError::invalid(
                "excitation_frequency",
                format!("must not be negative (received {})", self.excitation_frequency),
            ));
        }
        check_positive("fallback_node_mass", self.fallback_node_mass)
    }
}

/// Options of the SIMP density optimiser.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpConfig {
    /// Target ratio of material volume to the fully dense volume.
    pub volume_fraction: f64,
    /// Penalisation exponent `p`.
    pub penalization: f64,
    /// Largest density change per iteration.
    pub move_limit: f64,
    /// Damping exponent of the optimality criteria update.
    pub damping: f64,
    /// Lower bound on densities.
    pub min_density: f64,
    /// Convergence tolerance on relative compliance change and density change.
    pub tolerance: f64,
    /// Iteration budget.
    pub max_iterations: usize,
    /// Elements whose density ends below this value are removed in post-processing.
    pub threshold: f64,
}

impl Default for SimpConfig {
    fn default() -> Self {
        Self {
            volume_fraction: 0.5,
            penalization: 3.0,
            move_limit: 0.2,
            damping: 0.5,
            min_density: 1.0e-3,
            tolerance: 1.0e-3,
            max_iterations: 200,
            threshold: 0.01,
        }
    }
}

impl SimpConfig {
    /// Validate the SIMP options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for out-of-range fractions, a penalisation below one or an empty
    /// iteration budget.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_open("volume_fraction", self.volume_fraction)?;
        if !(self.penalization >= 1.0 && self.penalization.is_finite()) {
            return Err(ConfigError::invalid(
                "penalization",
                format!("must be at least 1 (received {})", self.penalization),
            ));
        }
        check_unit_open("move_limit", self.move_limit)?;
        check_unit_open("damping", self.damping)?;
        if !(self.min_density > 0.0 && self.min_density < self.volume_fraction) {
            return Err(ConfigError::invalid(
                "min_density",
                format!(
                    "must lie in (0, volume_fraction) (received {})",
                    self.min_density
                ),
            ));
        }
        check_positive("tolerance", self.tolerance)?;
        check_nonzero("max_iterations", self.max_iterations)?;
        check_unit_closed("threshold", self.threshold)
    }
}

/// Options of the support rebuilder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Share of active elements, ranked by stress, treated as stressed.
    pub top_fraction: f64,
    /// Stressed elements must also reach this fraction of the peak stress.
    pub stress_threshold: f64,
    /// Smallest accepted relative reduction of the peak stress.
    pub min_improvement: f64,
    /// Hard cap on the number of evaluated combinations.
    pub max_combinations: usize,
    /// Largest number of candidates reactivated together within one cluster.
    pub max_cluster_size: usize,
    /// Safety factor defining the allowable stress.
    pub safety_factor: f64,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            top_fraction: 0.02,
            stress_threshold: 0.75,
            min_improvement: 0.05,
            max_combinations: 200,
            max_cluster_size: 3,
            safety_factor: 1.4,
        }
    }
}

impl RebuildConfig {
    /// Validate the rebuilder options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for fractions outside `(0, 1]`, empty caps or a safety factor
    /// below one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_open("top_fraction", self.top_fraction)?;
        check_unit_closed("stress_threshold", self.stress_threshold)?;
        check_unit_open("min_improvement", self.min_improvement)?;
        check_nonzero("max_combinations", self.max_combinations)?;
        check_nonzero("max_cluster_size", self.max_cluster_size)?;
        if !(self.safety_factor >= 1.0 && self.safety_factor.is_finite()) {
            return Err(ConfigError::invalid(
                "safety_factor",
                format!("must be at least 1 (received {})", self.safety_factor),
            ));
        }
        Ok(())
    }
}

/// Complete configuration surface, loadable from JSON.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Static solver tolerances.
    pub solver: SolverConfig,
    /// Removal optimiser options.
    pub removal: RemovalConfig,
    /// Dynamic optimiser options.
    pub dynamic: DynamicConfig,
    /// SIMP options.
    pub simp: SimpConfig,
    /// Support rebuilder options.
    pub rebuild: RebuildConfig,
}

impl OptimizationConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.solver.validate()?;
        self.removal.validate()?;
        self.dynamic.validate()?;
        self.simp.validate()?;
        self.rebuild.validate()
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] for malformed input.
    ///
    /// # Examples
    /// ```
    /// use trusstopo::OptimizationConfig;
    ///
    /// let config = OptimizationConfig::from_json(r#"{ "simp": { "penalization": 4.0 } }"#)
    ///     .expect("valid json");
    /// assert_eq!(config.simp.penalization, 4.0);
    /// assert_eq!(config.simp.volume_fraction, 0.5);
    /// ```
    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, CodecError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(OptimizationConfig::default().validate(), Ok(()));
    }

    #[test]
    fn target_fraction_outside_unit_interval_is_rejected() {
        for target in [0.0, -0.1, 1.5] {
            let config = RemovalConfig {
                target_mass_fraction: target,
                ..RemovalConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidConfiguration {
                    field: "target_mass_fraction",
                    ..
                })
            ));
        }
    }

    #[test]
    fn safety_factor_below_one_is_rejected() {
        let config = RemovalConfig {
            stress_limit: Some(StressLimit { safety_factor: 0.5 }),
            ..RemovalConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn removal_rate_ramps_up() {
        let config = RemovalConfig {
            removal_rate: 0.1,
            ramp_start: 0.5,
            ramp_iterations: 4,
            ..RemovalConfig::default()
        };
        assert_relative_eq!(config.effective_rate(0), 0.05);
        assert_relative_eq!(config.effective_rate(2), 0.075);
        assert_relative_eq!(config.effective_rate(10), 0.1);
        assert_eq!(config.removal_count(100, 0), 5);
        assert_eq!(config.removal_count(3, 0), 1);
    }

    #[test]
    fn alpha_must_stay_in_unit_interval() {
        let config = DynamicConfig {
            alpha: 1.2,
            ..DynamicConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfiguration { field: "alpha", .. })
        ));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = OptimizationConfig::from_json(
            r#"{ "removal": { "target_mass_fraction": 0.3, "pair_policy": "split",
                 "stress_limit": { "safety_factor": 2.0 } } }"#,
        )
        .expect("valid json");
        assert_relative_eq!(config.removal.target_mass_fraction, 0.3);
        assert_eq!(config.removal.pair_policy, PairPolicy::Split);
        assert_eq!(config.removal.max_iterations, 200);
        let limit = config.removal.stress_limit.expect("limit parsed");
        assert_relative_eq!(limit.allowable(200.0), 100.0);
    }
}
