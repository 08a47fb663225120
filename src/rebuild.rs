//! Local repair of stress peaks by reactivating nodes next to the most stressed elements.

use std::collections::{BTreeMap, HashSet};

use log::{debug, info};
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::unionfind::UnionFind;

use crate::analysis::analyse;
use crate::config::{RebuildConfig, SolverConfig};
use crate::errors::OptimizationError;
use crate::optimizer::CancelToken;
use crate::solver::LinearSolver;
use crate::structure::Structure;
use crate::symmetry::Symmetry;

/// Result of a rebuild pass.
///
/// `reactivated_nodes` is enough to undo a committed pass with
/// [`Structure::deactivate_nodes`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RebuildOutcome {
    /// Nodes switched back on.
    pub reactivated_nodes: Vec<NodeIndex>,
    /// Elements that carry load again as a result.
    pub reactivated_elements: Vec<EdgeIndex>,
    /// Peak absolute stress before the pass in pascals.
    pub stress_before: f64,
    /// Peak absolute stress after the pass; equal to `stress_before` when nothing was committed.
    pub stress_after: f64,
    /// Allowable stress `yield / safety factor`.
    pub allowable: f64,
    /// Number of candidate groups found around the stressed elements.
    pub candidates: usize,
    /// Number of stressed clusters.
    pub clusters: usize,
    /// Number of combinations that were solved.
    pub combinations_tested: usize,
    /// Mass of the reactivated elements.
    pub added_mass: f64,
    /// Whether a combination was committed to the structure.
    pub committed: bool,
    /// Whether the search stopped on the cancel token; a cancelled pass commits nothing.
    pub cancelled: bool,
}

/// A solved reactivation.
#[derive(Clone, Debug)]
struct Trial {
    nodes: Vec<NodeIndex>,
    max_stress: f64,
    added_mass: f64,
}

impl Trial {
    /// Ordering key: designs within the allowable stress first, then lighter, then less stressed.
    fn better_than(&self, other: &Trial, allowable: f64) -> bool {
        let key = |t: &Trial| (t.max_stress > allowable, t.added_mass, t.max_stress);
        let (a, b) = (key(self), key(other));
        a.0.cmp(&b.0)
            .then(a.1.total_cmp(&b.1))
            .then(a.2.total_cmp(&b.2))
            .is_lt()
    }
}

/// Bounded combinatorial search that reactivates inactive nodes around a stress peak.
#[derive(Clone, Debug, Default)]
pub struct SupportRebuilder {
    config: RebuildConfig,
    solver: LinearSolver,
    cancel: CancelToken,
}

impl SupportRebuilder {
    /// Create a rebuilder.
    #[must_use]
    pub fn new(config: RebuildConfig, solver: SolverConfig) -> Self {
        Self {
            config,
            solver: LinearSolver::new(solver),
            cancel: CancelToken::new(),
        }
    }

    /// Attach a cancellation token, polled between combinations.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Try to relieve the stress peak of `structure` and commit the best passing combination.
    ///
    /// Nothing changes when the peak is already within the allowable stress or no combination
    /// lowers it by at least the configured relative improvement.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizationError`] when the configuration is invalid or the structure itself
    /// cannot be solved.
    pub fn rebuild(&self, structure: &mut Structure) -> Result<RebuildOutcome, OptimizationError> {
        self.config.validate()?;
        self.solver.config().validate()?;
        let response = analyse(structure, &self.solver)?;
        let stress_before = response.max_stress();
        let allowable = structure.material().yield_strength / self.config.safety_factor;
        let mut outcome = RebuildOutcome {
            stress_before,
            stress_after: stress_before,
            allowable,
            ..RebuildOutcome::default()
        };
        if stress_before <= allowable {
            info!("peak stress {stress_before:.3e} Pa is within {allowable:.3e} Pa");
            return Ok(outcome);
        }

        let stressed = self.stressed_elements(structure, &response.element_stress, stress_before);
        let symmetry = Symmetry::detect(structure);
        let clusters = clusters(structure, &stressed, &symmetry);
        outcome.clusters = clusters.len();
        outcome.candidates = clusters.iter().map(Vec::len).sum();
        debug!(
            "{} stressed elements, {} candidates in {} clusters",
            stressed.len(),
            outcome.candidates,
            outcome.clusters
        );

        let passes = |trial: &Trial| {
            (stress_before - trial.max_stress) / stress_before >= self.config.min_improvement
        };
        let mut best: Option<Trial> = None;
        let mut cluster_bests: Vec<Trial> = Vec::new();
        let mut capped = false;
        for candidates in &clusters {
            let mut cluster_best: Option<Trial> = None;
            let largest = candidates.len().min(self.config.max_cluster_size);
            'cluster: for size in 1..=largest {
                for picked in Combinations::new(candidates.len(), size) {
                    if outcome.combinations_tested >= self.config.max_combinations {
                        debug!("combination cap of {} reached", self.config.max_combinations);
                        capped = true;
                        break 'cluster;
                    }
                    if self.cancel.is_cancelled() {
                        info!("rebuild cancelled after {} combinations", outcome.combinations_tested);
                        outcome.cancelled = true;
                        return Ok(outcome);
                    }
                    let nodes: Vec<NodeIndex> = picked
                        .iter()
                        .flat_map(|i| candidates[*i].iter().copied())
                        .collect();
                    outcome.combinations_tested += 1;
                    let Some(trial) = self.evaluate(structure, nodes) else {
                        continue;
                    };
                    if passes(&trial)
                        && cluster_best
                            .as_ref()
                            .map_or(true, |current| trial.better_than(current, allowable))
                    {
                        cluster_best = Some(trial);
                    }
                }
            }
            if let Some(trial) = cluster_best {
                cluster_bests.push(trial);
            }
            if capped {
                break;
            }
        }

        for trial in &cluster_bests {
            if best.as_ref().map_or(true, |current| trial.better_than(current, allowable)) {
                best = Some(trial.clone());
            }
        }
        let budget_left = !capped && outcome.combinations_tested < self.config.max_combinations;
        if cluster_bests.len() > 1 && budget_left && !self.cancel.is_cancelled() {
            let nodes: Vec<NodeIndex> = cluster_bests
                .iter()
                .flat_map(|trial| trial.nodes.iter().copied())
                .collect();
            outcome.combinations_tested += 1;
            if let Some(trial) = self.evaluate(structure, nodes) {
                if passes(&trial)
                    && best.as_ref().map_or(true, |current| trial.better_than(current, allowable))
                {
                    best = Some(trial);
                }
            }
        }

        if let Some(trial) = best {
            let elements = structure.reactivate_nodes(&trial.nodes);
            outcome.added_mass = elements.iter().map(|e| structure.element_mass(*e)).sum();
            outcome.reactivated_nodes = trial.nodes;
            outcome.reactivated_elements = elements;
            outcome.stress_after = trial.max_stress;
            outcome.committed = true;
            info!(
                "reactivated {} nodes, peak stress {stress_before:.3e} -> {:.3e} Pa, added mass {:.3e} kg",
                outcome.reactivated_nodes.len(),
                outcome.stress_after,
                outcome.added_mass
            );
        } else {
            info!(
                "no combination lowers the peak stress by {:.0}%",
                100.0 * self.config.min_improvement
            );
        }
        Ok(outcome)
    }

    /// Top share of active elements by absolute stress that also reach the stress threshold.
    fn stressed_elements(
        &self,
        structure: &Structure,
        stresses: &[f64],
        peak: f64,
    ) -> Vec<EdgeIndex> {
        let mut ranked = structure.active_elements();
        ranked.sort_by(|a, b| stresses[b.index()].abs().total_cmp(&stresses[a.index()].abs()));
        let count = ((ranked.len() as f64 * self.config.top_fraction).ceil() as usize).max(1);
        ranked.truncate(count);
        ranked.retain(|e| stresses[e.index()].abs() >= self.config.stress_threshold * peak);
        ranked
    }

    /// Reactivate `nodes` on the structure, solve, and put everything back.
    fn evaluate(&self, structure: &mut Structure, nodes: Vec<NodeIndex>) -> Option<Trial> {
        let before = structure.snapshot();
        let elements = structure.reactivate_nodes(&nodes);
        let trial = if elements.is_empty() {
            None
        } else {
            match analyse(structure, &self.solver) {
                Ok(response) => Some(Trial {
                    max_stress: response.max_stress(),
                    added_mass: elements.iter().map(|e| structure.element_mass(*e)).sum(),
                    nodes,
                }),
                Err(err) => {
                    debug!("reactivating {nodes:?} leaves the structure unsolvable: {err}");
                    None
                }
            }
        };
        structure.restore(&before);
        trial
    }
}

/// Candidate groups per cluster of touching stressed elements.
///
/// A candidate is an inactive node sharing an element with a stressed node, expanded to its
/// inactive mirror partner. Every group is listed once, under the first cluster that reaches it.
fn clusters(
    structure: &Structure,
    stressed: &[EdgeIndex],
    symmetry: &Symmetry,
) -> Vec<Vec<Vec<NodeIndex>>> {
    let mut sets = UnionFind::new(structure.node_count());
    for element in stressed {
        if let Some((a, b)) = structure.endpoints(*element) {
            sets.union(a.index(), b.index());
        }
    }

    let mut seen = HashSet::new();
    let mut grouped: BTreeMap<usize, Vec<Vec<NodeIndex>>> = BTreeMap::new();
    for element in stressed {
        let Some((a, b)) = structure.endpoints(*element) else {
            continue;
        };
        for node in [a, b] {
            let root = sets.find(node.index());
            for incident in structure.incident_elements(node) {
                let Some(other) = structure.opposite(incident, node) else {
                    continue;
                };
                if structure.is_node_active(other) {
                    continue;
                }
                let representative = symmetry.representative(other);
                if !seen.insert(representative) {
                    continue;
                }
                let group: Vec<NodeIndex> = symmetry
                    .group(other)
                    .into_iter()
                    .filter(|member| !structure.is_node_active(*member))
                    .collect();
                grouped.entry(root).or_default().push(group);
            }
        }
    }
    grouped.into_values().collect()
}

/// Index combinations of `size` out of `n`, in lexicographic order.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    fn new(n: usize, size: usize) -> Self {
        Self {
            n,
            indices: (0..size).collect(),
            done: size == 0 || size > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self.indices.clone();
        let size = self.indices.len();
        // advance the rightmost index that still has room
        match (0..size).rev().find(|&i| self.indices[i] < self.n - size + i) {
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..size {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
            }
            None => self.done = true,
        }
        Some(current)
    }
}
