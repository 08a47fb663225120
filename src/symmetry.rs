//! Mirror symmetry about the vertical centreline of the active structure.

use std::collections::HashSet;

use log::debug;
use petgraph::graph::NodeIndex;

use crate::structure::Structure;

/// Relative tolerance on coordinates and loads used by [`Symmetry::detect`].
pub const DEFAULT_TOLERANCE: f64 = 1.0e-6;

/// Mirror partner of every node, or the identity when the structure is not symmetric.
#[derive(Clone, Debug, PartialEq)]
pub struct Symmetry {
    axis: Option<f64>,
    partners: Vec<NodeIndex>,
}

impl Symmetry {
    /// Identity mapping: every node forms its own group.
    #[must_use]
    pub fn none(structure: &Structure) -> Self {
        Self {
            axis: None,
            partners: structure.node_indices().collect(),
        }
    }

    /// Detect symmetry with [`DEFAULT_TOLERANCE`].
    ///
    /// # Examples
    /// ```
    /// use trusstopo::{force, steel, GridSpec, Symmetry};
    ///
    /// let grid = GridSpec::default();
    /// let mut structure = grid.build(steel()).unwrap();
    /// grid.apply_simply_supported(&mut structure, force(0.0, -1.0e3)).unwrap();
    ///
    /// let symmetry = Symmetry::detect(&structure);
    /// assert!(symmetry.is_symmetric());
    /// assert_eq!(symmetry.partner(grid.node_at(1, 0)), grid.node_at(1, 2));
    /// ```
    #[must_use]
    pub fn detect(structure: &Structure) -> Self {
        Self::detect_with_tolerance(structure, DEFAULT_TOLERANCE)
    }

    /// Detect symmetry about the centre of the active bounding box.
    ///
    /// The structure is symmetric when every node has a geometric mirror partner with the same
    /// activity and support presence, mirrored loads (`fx -> -fx`) and when every active element
    /// maps onto an active element.
    #[must_use]
    pub fn detect_with_tolerance(structure: &Structure, tolerance: f64) -> Self {
        match find_partners(structure, tolerance) {
            Some((axis, partners)) => {
                debug!("mirror symmetry detected about x = {axis}");
                Self {
                    axis: Some(axis),
                    partners,
                }
            }
            None => Self::none(structure),
        }
    }

    /// Whether a mirror mapping was found.
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        self.axis.is_some()
    }

    /// X coordinate of the mirror axis.
    #[must_use]
    pub fn axis(&self) -> Option<f64> {
        self.axis
    }

    /// Mirror partner of `node`; the node itself on the axis or without symmetry.
    #[must_use]
    pub fn partner(&self, node: NodeIndex) -> NodeIndex {
        self.partners.get(node.index()).copied().unwrap_or(node)
    }

    /// The node and its partner, sorted and deduplicated.
    #[must_use]
    pub fn group(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let partner = self.partner(node);
        match node.cmp(&partner) {
            std::cmp::Ordering::Less => vec![node, partner],
            std::cmp::Ordering::Equal => vec![node],
            std::cmp::Ordering::Greater => vec![partner, node],
        }
    }

    /// Representative of a group: its smallest index.
    #[must_use]
    pub fn representative(&self, node: NodeIndex) -> NodeIndex {
        node.min(self.partner(node))
    }
}

fn find_partners(structure: &Structure, tolerance: f64) -> Option<(f64, Vec<NodeIndex>)> {
    let active = structure.active_nodes();
    let positions: Vec<_> = active
        .iter()
        .filter_map(|n| structure.node(*n).map(|node| node.position))
        .collect();
    let first = positions.first()?;
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
    for p in &positions {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    let axis = 0.5 * (min_x + max_x);
    let length_tol = tolerance * (max_x - min_x).max(max_y - min_y).max(1.0e-12);
    let load_scale = structure
        .node_indices()
        .filter_map(|n| structure.node(n))
        .map(|node| node.load.x.abs().max(node.load.y.abs()))
        .fold(0.0, f64::max);
    let load_tol = tolerance * load_scale.max(f64::MIN_POSITIVE);

    let nodes: Vec<NodeIndex> = structure.node_indices().collect();
    let mut partners = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let weight = structure.node(*node)?;
        let target = weight.position.mirrored(axis);
        let partner = nodes.iter().copied().find(|candidate| {
            structure
                .node(*candidate)
                .is_some_and(|other| other.position.distance_to(target) <= length_tol)
        })?;
        let other = structure.node(partner)?;
        if other.active != weight.active
            || other.support.is_supported() != weight.support.is_supported()
            || (other.load.x + weight.load.x).abs() > load_tol
            || (other.load.y - weight.load.y).abs() > load_tol
        {
            return None;
        }
        partners.push(partner);
    }

    let ordered = |a: NodeIndex, b: NodeIndex| (a.min(b), a.max(b));
    let mut active_pairs = HashSet::new();
    for element in structure.active_elements() {
        let (a, b) = structure.endpoints(element)?;
        active_pairs.insert(ordered(a, b));
    }
    for (a, b) in &active_pairs {
        let mirrored = ordered(partners[a.index()], partners[b.index()]);
        if !active_pairs.contains(&mirrored) {
            return None;
        }
    }
    Some((axis, partners))
}
