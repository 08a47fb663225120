//! Load path checks and dead-material pruning over the active subgraph.

use log::debug;
use petgraph::graph::NodeIndex;
use petgraph::unionfind::UnionFind;

use crate::structure::Structure;

/// Union-find over active elements, ignoring anything touching `excluded`.
fn components(structure: &Structure, excluded: &[NodeIndex]) -> UnionFind<usize> {
    let mut sets = UnionFind::new(structure.node_count());
    for element in structure.active_elements() {
        if let Some((a, b)) = structure.endpoints(element) {
            if !excluded.contains(&a) && !excluded.contains(&b) {
                sets.union(a.index(), b.index());
            }
        }
    }
    sets
}

/// Whether every active loaded node shares a component with at least one active supported node.
///
/// # Examples
/// ```
/// use trusstopo::{connectivity, force, point, steel, Structure, Support};
///
/// let mut structure = Structure::new(steel());
/// let a = structure.add_node(point(0.0, 0.0));
/// let b = structure.add_node(point(1.0, 0.0));
/// structure.set_support(a, Support::Pinned).unwrap();
/// structure.set_load(b, force(0.0, -1.0)).unwrap();
/// assert!(!connectivity::loads_reach_supports(&structure));
///
/// structure.add_element(a, b, 1.0e-4).unwrap();
/// assert!(connectivity::loads_reach_supports(&structure));
/// ```
#[must_use]
pub fn loads_reach_supports(structure: &Structure) -> bool {
    loads_reach_supports_without(structure, &[])
}

/// [`loads_reach_supports`] as if the nodes in `excluded` were already deactivated.
#[must_use]
pub fn loads_reach_supports_without(structure: &Structure, excluded: &[NodeIndex]) -> bool {
    let loaded = structure.loaded_nodes();
    let supported: Vec<NodeIndex> = structure
        .supported_nodes()
        .into_iter()
        .filter(|node| !excluded.contains(node))
        .collect();
    let sets = components(structure, excluded);
    loaded.iter().all(|load| {
        !excluded.contains(load)
            && supported
                .iter()
                .any(|support| sets.equiv(load.index(), support.index()))
    })
}

/// Whether all active nodes form a single component.
#[must_use]
pub fn is_connected(structure: &Structure) -> bool {
    let active = structure.active_nodes();
    let Some(first) = active.first() else {
        return true;
    };
    let sets = components(structure, &[]);
    active
        .iter()
        .all(|node| sets.equiv(first.index(), node.index()))
}

/// Deactivate unprotected nodes that cannot carry load and return them.
///
/// A node is removed when it is dangling (at most one active element) or when its component
/// lacks either a support or a load. Removal repeats until nothing changes.
pub fn prune_dead_material(structure: &mut Structure) -> Vec<NodeIndex> {
    let mut pruned = Vec::new();
    loop {
        let sets = components(structure, &[]);
        let mut has_support = vec![false; structure.node_count()];
        let mut has_load = vec![false; structure.node_count()];
        for node in structure.supported_nodes() {
            has_support[sets.find(node.index())] = true;
        }
        for node in structure.loaded_nodes() {
            has_load[sets.find(node.index())] = true;
        }

        let dead: Vec<NodeIndex> = structure
            .active_nodes()
            .into_iter()
            .filter(|node| !structure.is_protected(*node))
            .filter(|node| {
                let root = sets.find(node.index());
                structure.active_incident_elements(*node).len() <= 1
                    || !(has_support[root] && has_load[root])
            })
            .collect();
        if dead.is_empty() {
            break;
        }
        debug!("pruning {} dead nodes", dead.len());
        structure.deactivate_nodes(&dead);
        pruned.extend(dead);
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{force, point};
    use crate::material::steel;
    use crate::structure::Support;

    /// Triangle a-b-c with a dangling node d hanging off c and an island e-f.
    fn sample() -> (Structure, Vec<NodeIndex>) {
        let mut structure = Structure::new(steel());
        let nodes: Vec<NodeIndex> = [
            (0.0, 0.0),
            (2.0, 0.0),
            (1.0, 1.0),
            (1.0, 2.0),
            (5.0, 5.0),
            (6.0, 5.0),
        ]
        .into_iter()
        .map(|(x, y)| structure.add_node(point(x, y)))
        .collect();
        for (a, b) in [(0, 1), (1, 2), (0, 2), (2, 3), (4, 5)] {
            structure
                .add_element(nodes[a], nodes[b], 1.0e-4)
                .expect("valid element");
        }
        structure
            .set_support(nodes[0], Support::Pinned)
            .expect("known node");
        structure
            .set_support(nodes[1], Support::PinnedY)
            .expect("known node");
        structure
            .set_load(nodes[2], force(0.0, -1.0))
            .expect("known node");
        (structure, nodes)
    }

    #[test]
    fn load_path_follows_active_elements() {
        let (mut structure, nodes) = sample();
        assert!(loads_reach_supports(&structure));
        assert!(!is_connected(&structure));

        assert!(loads_reach_supports_without(&structure, &[nodes[3]]));
        assert!(!loads_reach_supports_without(&structure, &[nodes[2]]));

        structure.deactivate_nodes(&[nodes[0], nodes[1]]);
        assert!(!loads_reach_supports(&structure));
    }

    #[test]
    fn pruning_removes_dangling_nodes_and_islands() {
        let (mut structure, nodes) = sample();
        let mut pruned = prune_dead_material(&mut structure);
        pruned.sort();
        assert_eq!(pruned, vec![nodes[3], nodes[4], nodes[5]]);
        assert_eq!(structure.active_node_count(), 3);
        assert!(is_connected(&structure));
    }

    #[test]
    fn protected_nodes_survive_pruning() {
        let (mut structure, nodes) = sample();
        structure
            .set_load(nodes[3], force(1.0, 0.0))
            .expect("known node");
        let pruned = prune_dead_material(&mut structure);
        assert!(!pruned.contains(&nodes[3]));
        assert!(structure.is_node_active(nodes[3]));
    }
}
