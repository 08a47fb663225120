use std::collections::HashSet;

use log::{debug, info};
use petgraph::graph::NodeIndex;

use super::{
    validate_for_optimization, CancelToken, EigenRecord, OptimizationOutcome, OptimizationState,
    TerminationReason,
};
use crate::analysis::{analyse, StaticResponse};
use crate::config::{PairPolicy, RemovalConfig};
use crate::connectivity::{loads_reach_supports, prune_dead_material};
use crate::errors::OptimizationError;
use crate::solver::LinearSolver;
use crate::structure::Structure;
use crate::symmetry::Symmetry;

/// Node importance of the current design.
pub(crate) struct Evaluation {
    /// Score per node index; the lowest scoring groups are removed first.
    pub scores: Vec<f64>,
    /// First-mode metrics, when the scorer computes them.
    pub eigen: Option<EigenRecord>,
}

/// Scoring step of the shared removal loop.
pub(crate) trait NodeScorer {
    /// Score every node of an accepted design.
    fn evaluate(&mut self, structure: &Structure, response: &StaticResponse) -> Evaluation;
}

/// Iterative removal loop shared by the static and dynamic optimisers.
///
/// Each iteration removes the lowest scoring symmetry groups one after another. A group is
/// tentatively deactivated together with the dead material it leaves behind; it is kept only if
/// the loads still reach a support and the structure remains solvable.
pub(crate) fn run_removal<S: NodeScorer>(
    structure: &Structure,
    config: &RemovalConfig,
    solver: &LinearSolver,
    cancel: &CancelToken,
    scorer: &mut S,
) -> Result<OptimizationOutcome, OptimizationError> {
    config.validate()?;
    solver.config().validate()?;
    let working = structure.clone();
    let response = validate_for_optimization(&working, solver)?;
    let symmetry = Symmetry::detect(&working);
    let allowable = config
        .stress_limit
        .map(|limit| limit.allowable(working.material().yield_strength));

    let mut state = OptimizationState::new(working, response);
    let evaluation = scorer.evaluate(&state.structure, &state.response);
    let mut scores = evaluation.scores;
    let mut history = vec![state.record(Vec::new(), evaluation.eigen)];
    let mut blacklist: HashSet<NodeIndex> = HashSet::new();

    let termination = 'run: {
        if let Some(limit) = allowable {
            if state.response.max_stress() > limit {
                info!(
                    "initial peak stress {:.3e} Pa already exceeds {limit:.3e} Pa",
                    state.response.max_stress()
                );
                break 'run TerminationReason::StressLimitReached;
            }
        }
        loop {
            if state.mass_fraction() <= config.target_mass_fraction {
                break 'run TerminationReason::TargetReached;
            }
            if state.iteration >= config.max_iterations {
                break 'run TerminationReason::MaxIterations;
            }
            if cancel.is_cancelled() {
                break 'run TerminationReason::Cancelled;
            }

            let groups = candidate_groups(
                &state.structure,
                &symmetry,
                &scores,
                &blacklist,
                config.pair_policy,
            );
            if groups.is_empty() {
                break 'run TerminationReason::NoRemovableCandidate;
            }
            let quota = config.removal_count(state.structure.active_node_count(), state.iteration);

            let mut removed = Vec::new();
            let mut stress_hit = false;
            for group in groups {
                if removed.len() >= quota {
                    break;
                }
                let before = state.structure.snapshot();
                state.structure.deactivate_nodes(&group);
                let pruned = prune_dead_material(&mut state.structure);
                if !loads_reach_supports(&state.structure) {
                    debug!("group {group:?} disconnects a load");
                    state.structure.restore(&before);
                    continue;
                }
                let response = match analyse(&state.structure, solver) {
                    Ok(response) => response,
                    Err(err) => {
                        debug!("group {group:?} rejected: {err}");
                        state.structure.restore(&before);
                        blacklist.extend(group.iter().copied());
                        continue;
                    }
                };
                if let Some(limit) = allowable {
                    if response.max_stress() > limit {
                        debug!(
                            "group {group:?} would raise the peak stress to {:.3e} Pa",
                            response.max_stress()
                        );
                        state.structure.restore(&before);
                        stress_hit = true;
                        break;
                    }
                }
                removed.extend(group.iter().chain(&pruned).map(|node| node.index()));
                state.response = response;
                if state.mass_fraction() <= config.target_mass_fraction {
                    break;
                }
            }

            if removed.is_empty() {
                break 'run if stress_hit {
                    TerminationReason::StressLimitReached
                } else {
                    TerminationReason::NoRemovableCandidate
                };
            }
            state.iteration += 1;
            let evaluation = scorer.evaluate(&state.structure, &state.response);
            scores = evaluation.scores;
            info!(
                "iteration {}: removed {} nodes, mass fraction {:.4}, peak stress {:.3e} Pa",
                state.iteration,
                removed.len(),
                state.mass_fraction(),
                state.response.max_stress()
            );
            history.push(state.record(removed, evaluation.eigen));
            if stress_hit {
                break 'run TerminationReason::StressLimitReached;
            }
        }
    };

    info!("removal finished after {} iterations: {termination}", state.iteration);
    state.termination = Some(termination);
    Ok(OptimizationOutcome {
        structure: state.structure,
        history,
        termination,
    })
}

/// Removable groups ordered by mean score, lowest first.
fn candidate_groups(
    structure: &Structure,
    symmetry: &Symmetry,
    scores: &[f64],
    blacklist: &HashSet<NodeIndex>,
    policy: PairPolicy,
) -> Vec<Vec<NodeIndex>> {
    let mut seen = HashSet::new();
    let mut groups = Vec::new();
    for node in structure.active_nodes() {
        let representative = symmetry.representative(node);
        if !seen.insert(representative) {
            continue;
        }
        let members = symmetry.group(node);
        if members
            .iter()
            .any(|m| !structure.is_node_active(*m) || blacklist.contains(m))
        {
            continue;
        }
        let free: Vec<NodeIndex> = members
            .iter()
            .copied()
            .filter(|m| !structure.is_protected(*m))
            .collect();
        let members = if free.len() == members.len() {
            members
        } else {
            match policy {
                PairPolicy::Atomic => continue,
                PairPolicy::Split => free,
            }
        };
        if members.is_empty() {
            continue;
        }
        let score = members
            .iter()
            .map(|m| scores.get(m.index()).copied().unwrap_or(0.0))
            .sum::<f64>()
            / members.len() as f64;
        groups.push((score, representative, members));
    }
    groups.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    groups.into_iter().map(|(_, _, members)| members).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::force;
    use crate::grid::GridSpec;
    use crate::material::steel;
    use crate::structure::Support;

    fn grid() -> (Structure, GridSpec) {
        let grid = GridSpec {
            nx: 5,
            ny: 3,
            width: 4.0,
            height: 2.0,
            area: 1.0e-4,
        };
        let mut structure = grid.build(steel()).expect("valid grid");
        grid.apply_simply_supported(&mut structure, force(0.0, -1.0e3))
            .expect("grid matches");
        (structure, grid)
    }

    #[test]
    fn groups_follow_scores_and_skip_protected_nodes() {
        let (structure, grid) = grid();
        let symmetry = Symmetry::detect(&structure);
        let scores: Vec<f64> = (0..structure.node_count()).map(|i| i as f64).collect();

        let groups = candidate_groups(
            &structure,
            &symmetry,
            &scores,
            &HashSet::new(),
            PairPolicy::Atomic,
        );
        // bottom corners and the loaded top-middle node are protected
        assert_eq!(groups[0], vec![grid.node_at(0, 1), grid.node_at(0, 3)]);
        assert!(groups.iter().all(|g| !g.contains(&grid.node_at(0, 0))));
        assert!(groups.iter().all(|g| !g.contains(&grid.node_at(2, 2))));
        assert!(groups.contains(&vec![grid.node_at(0, 2)]));
    }

    #[test]
    fn pair_policy_decides_partially_protected_pairs() {
        let (mut structure, grid) = grid();
        structure
            .set_support(grid.node_at(1, 0), Support::PinnedX)
            .expect("known node");
        // force the pairing of the now one-sided support
        let symmetry = Symmetry::detect(&grid.build(steel()).expect("valid grid"));
        let scores = vec![0.0; structure.node_count()];
        let pair = vec![grid.node_at(1, 0), grid.node_at(1, 4)];

        let atomic = candidate_groups(
            &structure,
            &symmetry,
            &scores,
            &HashSet::new(),
            PairPolicy::Atomic,
        );
        assert!(!atomic.contains(&pair));
        assert!(!atomic.contains(&vec![grid.node_at(1, 4)]));

        let split = candidate_groups(
            &structure,
            &symmetry,
            &scores,
            &HashSet::new(),
            PairPolicy::Split,
        );
        assert!(split.contains(&vec![grid.node_at(1, 4)]));
    }

    #[test]
    fn blacklisted_groups_are_skipped() {
        let (structure, grid) = grid();
        let symmetry = Symmetry::detect(&structure);
        let scores = vec![0.0; structure.node_count()];
        let blacklist: HashSet<NodeIndex> = [grid.node_at(1, 1), grid.node_at(1, 3)].into();
        let groups = candidate_groups(
            &structure,
            &symmetry,
            &scores,
            &blacklist,
            PairPolicy::Atomic,
        );
        assert!(!groups.contains(&vec![grid.node_at(1, 1), grid.node_at(1, 3)]));
    }
}
