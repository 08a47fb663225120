//! Core data structures for planar pin-jointed structures.
//!
//! Nodes and elements live in a petgraph arena and are never removed: optimisers toggle their
//! `active` flags instead, which keeps every [`NodeIndex`] and [`EdgeIndex`] valid for history
//! replay and symmetry pairing.

use nalgebra::{DVector, Vector2};
use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::errors::{ElementPropertyError, StructureEditError};
use crate::geometry::{Force, Point};
use crate::material::MaterialProperties;

/// Translational restraint applied to a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Support {
    /// Both translations are free.
    #[default]
    Free,
    /// Only the X translation is restrained.
    PinnedX,
    /// Only the Y translation is restrained (roller on a horizontal surface).
    PinnedY,
    /// Both translations are restrained.
    Pinned,
}

impl Support {
    /// Build a support from per-axis restraint flags.
    #[must_use]
    pub const fn from_flags(fix_x: bool, fix_y: bool) -> Self {
        match (fix_x, fix_y) {
            (false, false) => Self::Free,
            (true, false) => Self::PinnedX,
            (false, true) => Self::PinnedY,
            (true, true) => Self::Pinned,
        }
    }

    /// Whether the X translation is restrained.
    #[must_use]
    pub const fn fixes_x(self) -> bool {
        matches!(self, Self::PinnedX | Self::Pinned)
    }

    /// Whether the Y translation is restrained.
    #[must_use]
    pub const fn fixes_y(self) -> bool {
        matches!(self, Self::PinnedY | Self::Pinned)
    }

    /// Whether any translation is restrained.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Free)
    }
}

/// A pin joint carrying two translational degrees of freedom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Position of the node in metres.
    pub position: Point,
    /// Restraint state of the node.
    pub support: Support,
    /// External load applied to the node in newtons.
    pub load: Force,
    /// Lumped mass in kilograms overriding the element-derived value.
    pub mass: Option<f64>,
    /// Whether the node is part of the current design.
    pub active: bool,
}

impl Node {
    fn new(position: Point) -> Self {
        Self {
            position,
            support: Support::Free,
            load: Force::default(),
            mass: None,
            active: true,
        }
    }

    /// Loaded or supported nodes are never removal candidates.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.support.is_supported() || self.load.is_loaded()
    }
}

/// An axial two-node bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Cross-sectional area in square metres.
    pub area: f64,
    /// Whether the element itself is switched on; it only carries load when both endpoint
    /// nodes are active as well.
    pub active: bool,
}

/// Activity flags and areas captured after an iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Node activity indexed by node index.
    pub nodes: Vec<bool>,
    /// Element flags indexed by element index.
    pub elements: Vec<bool>,
    /// Element areas indexed by element index.
    pub areas: Vec<f64>,
}

impl Snapshot {
    /// Number of active nodes in the snapshot.
    #[must_use]
    pub fn active_node_count(&self) -> usize {
        self.nodes.iter().filter(|active| **active).count()
    }
}

/// Global degree-of-freedom indices `[ux, uy]` of a node.
#[must_use]
pub fn node_dofs(node: NodeIndex) -> [usize; 2] {
    [2 * node.index(), 2 * node.index() + 1]
}

/// Container for a planar pin-jointed structure and its boundary conditions.
#[derive(Clone, Debug)]
pub struct Structure {
    /// Arena of nodes and elements.
    graph: UnGraph<Node, Element>,
    /// Material shared by every element.
    material: MaterialProperties,
}

impl Structure {
    /// Create an empty structure made of `material`.
    ///
    /// # Examples
    /// ```
    /// use trusstopo::{steel, Structure};
    ///
    /// let structure = Structure::new(steel());
    /// assert_eq!(structure.node_count(), 0);
    /// ```
    #[must_use]
    pub fn new(material: MaterialProperties) -> Self {
        Self {
            graph: UnGraph::default(),
            material,
        }
    }

    /// Material shared by every element.
    #[must_use]
    pub fn material(&self) -> &MaterialProperties {
        &self.material
    }

    /// Replace the material.
    pub fn set_material(&mut self, material: MaterialProperties) {
        self.material = material;
    }

    /// Total number of nodes, active or not.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Total number of elements, active or not.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Size of the global displacement vector.
    #[must_use]
    pub fn dof_count(&self) -> usize {
        2 * self.node_count()
    }

    /// Add a free, unloaded node.
    ///
    /// # Examples
    /// ```
    /// use trusstopo::{point, steel, Structure};
    ///
    /// let mut structure = Structure::new(steel());
    /// let node = structure.add_node(point(0.0, 0.0));
    /// assert_eq!(node.index(), 0);
    /// ```
    pub fn add_node(&mut self, position: Point) -> NodeIndex {
        self.graph.add_node(Node::new(position))
    }

    /// Connect two nodes with a new active element.
    ///
    /// # Errors
    ///
    /// Returns [`StructureEditError`] when either node is unknown, the nodes coincide, they are
    /// already connected or `area` is not strictly positive.
    pub fn add_element(
        &mut self,
        start: NodeIndex,
        end: NodeIndex,
        area: f64,
    ) -> Result<EdgeIndex, StructureEditError> {
        let a = self.checked_node(start)?.position;
        let b = self.checked_node(end)?.position;
        if start == end || a.distance_to(b) == 0.0 {
            return Err(StructureEditError::ZeroLengthElement(start, end));
        }
        if self.graph.find_edge(start, end).is_some() {
            return Err(StructureEditError::DuplicateElement(start, end));
        }
        check_area(area)?;
        Ok(self
            .graph
            .add_edge(start, end, Element { area, active: true }))
    }

    /// Set the restraint state of a node.
    ///
    /// # Errors
    ///
    /// Returns [`StructureEditError::UnknownNode`] when `node` is not part of this structure.
    pub fn set_support(
        &mut self,
        node: NodeIndex,
        support: Support,
    ) -> Result<(), StructureEditError> {
        self.checked_node_mut(node)?.support = support;
        Ok(())
    }

    /// Apply a point load to a node.
    ///
    /// # Errors
    ///
    /// Returns [`StructureEditError::UnknownNode`] when `node` is not part of this structure.
    pub fn set_load(&mut self, node: NodeIndex, load: Force) -> Result<(), StructureEditError> {
        self.checked_node_mut(node)?.load = load;
        Ok(())
    }

    /// Override the lumped mass of a node.
    ///
    /// # Errors
    ///
    /// Returns [`StructureEditError::UnknownNode`] when `node` is not part of this structure.
    pub fn set_node_mass(
        &mut self,
        node: NodeIndex,
        mass: Option<f64>,
    ) -> Result<(), StructureEditError> {
        self.checked_node_mut(node)?.mass = mass;
        Ok(())
    }

    /// Change the cross-sectional area of an element.
    ///
    /// # Errors
    ///
    /// Returns [`StructureEditError`] when `element` is unknown or `area` is not positive.
    pub fn set_area(&mut self, element: EdgeIndex, area: f64) -> Result<(), StructureEditError> {
        check_area(area)?;
        self.checked_element_mut(element)?.area = area;
        Ok(())
    }

    /// Switch an element on or off independently of its nodes.
    ///
    /// # Errors
    ///
    /// Returns [`StructureEditError::UnknownElement`] when `element` is not part of this
    /// structure.
    pub fn set_element_active(
        &mut self,
        element: EdgeIndex,
        active: bool,
    ) -> Result<(), StructureEditError> {
        self.checked_element_mut(element)?.active = active;
        Ok(())
    }

    /// Retrieve a node.
    #[must_use]
    pub fn node(&self, node: NodeIndex) -> Option<&Node> {
        self.graph.node_weight(node)
    }

    /// Retrieve an element.
    #[must_use]
    pub fn element(&self, element: EdgeIndex) -> Option<&Element> {
        self.graph.edge_weight(element)
    }

    /// Iterate over every node index in insertion order.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Iterate over every element index in insertion order.
    pub fn element_indices(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph.edge_indices()
    }

    /// Endpoint nodes of an element.
    #[must_use]
    pub fn endpoints(&self, element: EdgeIndex) -> Option<(NodeIndex, NodeIndex)> {
        self.graph.edge_endpoints(element)
    }

    /// Whether a node is part of the current design.
    #[must_use]
    pub fn is_node_active(&self, node: NodeIndex) -> bool {
        self.graph.node_weight(node).map_or(false, |n| n.active)
    }

    /// Whether an element carries load: its own flag and both endpoint nodes are active.
    #[must_use]
    pub fn is_element_active(&self, element: EdgeIndex) -> bool {
        match (self.graph.edge_weight(element), self.endpoints(element)) {
            (Some(edge), Some((a, b))) => {
                edge.active && self.is_node_active(a) && self.is_node_active(b)
            }
            _ => false,
        }
    }

    /// Active nodes in index order.
    #[must_use]
    pub fn active_nodes(&self) -> Vec<NodeIndex> {
        self.node_indices()
            .filter(|n| self.is_node_active(*n))
            .collect()
    }

    /// Number of active nodes.
    #[must_use]
    pub fn active_node_count(&self) -> usize {
        self.graph.node_weights().filter(|n| n.active).count()
    }

    /// Active elements in index order.
    #[must_use]
    pub fn active_elements(&self) -> Vec<EdgeIndex> {
        self.element_indices()
            .filter(|e| self.is_element_active(*e))
            .collect()
    }

    /// Active elements attached to `node`.
    #[must_use]
    pub fn active_incident_elements(&self, node: NodeIndex) -> Vec<EdgeIndex> {
        self.graph
            .edges(node)
            .map(|edge| edge.id())
            .filter(|e| self.is_element_active(*e))
            .collect()
    }

    /// Every element attached to `node`, regardless of activity.
    pub fn incident_elements(&self, node: NodeIndex) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph.edges(node).map(|edge| edge.id())
    }

    /// Node at the other end of `element` seen from `node`.
    #[must_use]
    pub fn opposite(&self, element: EdgeIndex, node: NodeIndex) -> Option<NodeIndex> {
        let (a, b) = self.endpoints(element)?;
        if a == node {
            Some(b)
        } else if b == node {
            Some(a)
        } else {
            None
        }
    }

    /// Active nodes carrying a non-zero load.
    #[must_use]
    pub fn loaded_nodes(&self) -> Vec<NodeIndex> {
        self.active_nodes()
            .into_iter()
            .filter(|n| self.graph[*n].load.is_loaded())
            .collect()
    }

    /// Active nodes with at least one restrained translation.
    #[must_use]
    pub fn supported_nodes(&self) -> Vec<NodeIndex> {
        self.active_nodes()
            .into_iter()
            .filter(|n| self.graph[*n].support.is_supported())
            .collect()
    }

    /// Whether `node` is loaded or supported.
    #[must_use]
    pub fn is_protected(&self, node: NodeIndex) -> bool {
        self.graph.node_weight(node).map_or(false, Node::is_protected)
    }

    /// Length of an element derived from its endpoint positions.
    #[must_use]
    pub fn element_length(&self, element: EdgeIndex) -> Option<f64> {
        let (a, b) = self.endpoints(element)?;
        Some(self.graph[a].position.distance_to(self.graph[b].position))
    }

    /// Unit vector pointing from the first to the second endpoint.
    #[must_use]
    pub fn element_direction(&self, element: EdgeIndex) -> Option<Vector2<f64>> {
        let (a, b) = self.endpoints(element)?;
        let delta = self.graph[b].position.to_vector() - self.graph[a].position.to_vector();
        let length = delta.norm();
        (length > 0.0).then(|| delta / length)
    }

    /// Axial stiffness `E A / L` of an element.
    #[must_use]
    pub fn axial_stiffness(&self, element: EdgeIndex) -> f64 {
        match (self.element(element), self.element_length(element)) {
            (Some(edge), Some(length)) if length > 0.0 => {
                self.material.elastic_modulus * edge.area / length
            }
            _ => 0.0,
        }
    }

    /// Material volume `A L` of an element.
    #[must_use]
    pub fn element_volume(&self, element: EdgeIndex) -> f64 {
        match (self.element(element), self.element_length(element)) {
            (Some(edge), Some(length)) => edge.area * length,
            _ => 0.0,
        }
    }

    /// Mass `rho A L` of an element.
    #[must_use]
    pub fn element_mass(&self, element: EdgeIndex) -> f64 {
        self.material.density * self.element_volume(element)
    }

    /// Summed volume of all active elements.
    #[must_use]
    pub fn active_volume(&self) -> f64 {
        self.active_elements()
            .into_iter()
            .map(|e| self.element_volume(e))
            .sum()
    }

    /// Summed mass of all active elements.
    #[must_use]
    pub fn total_mass(&self) -> f64 {
        self.material.density * self.active_volume()
    }

    /// Relative axial extension of an element for a global displacement vector.
    #[must_use]
    pub fn axial_extension(&self, element: EdgeIndex, displacements: &DVector<f64>) -> f64 {
        let (Some((a, b)), Some(direction)) =
            (self.endpoints(element), self.element_direction(element))
        else {
            return 0.0;
        };
        let [ax, ay] = node_dofs(a);
        let [bx, by] = node_dofs(b);
        let relative = Vector2::new(
            displacements[bx] - displacements[ax],
            displacements[by] - displacements[ay],
        );
        direction.dot(&relative)
    }

    /// Global load vector built from the loads of active nodes.
    #[must_use]
    pub fn load_vector(&self) -> DVector<f64> {
        let mut load = DVector::zeros(self.dof_count());
        for node in self.active_nodes() {
            let [x, y] = node_dofs(node);
            load[x] = self.graph[node].load.x;
            load[y] = self.graph[node].load.y;
        }
        load
    }

    /// Unrestrained degrees of freedom of active nodes, in ascending order.
    #[must_use]
    pub fn free_dofs(&self) -> Vec<usize> {
        let mut free = Vec::new();
        for node in self.active_nodes() {
            let [x, y] = node_dofs(node);
            let support = self.graph[node].support;
            if !support.fixes_x() {
                free.push(x);
            }
            if !support.fixes_y() {
                free.push(y);
            }
        }
        free
    }

    /// Deactivate nodes; their incident elements stop carrying load with them.
    pub fn deactivate_nodes(&mut self, nodes: &[NodeIndex]) {
        for node in nodes {
            if let Some(weight) = self.graph.node_weight_mut(*node) {
                weight.active = false;
            }
        }
    }

    /// Reactivate nodes and return the elements that carry load again as a result.
    pub fn reactivate_nodes(&mut self, nodes: &[NodeIndex]) -> Vec<EdgeIndex> {
        let before: Vec<bool> = self
            .element_indices()
            .map(|e| self.is_element_active(e))
            .collect();
        for node in nodes {
            if let Some(weight) = self.graph.node_weight_mut(*node) {
                weight.active = true;
            }
        }
        self.element_indices()
            .filter(|e| !before[e.index()] && self.is_element_active(*e))
            .collect()
    }

    /// Capture activity flags and areas.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            nodes: self.graph.node_weights().map(|n| n.active).collect(),
            elements: self.graph.edge_weights().map(|e| e.active).collect(),
            areas: self.graph.edge_weights().map(|e| e.area).collect(),
        }
    }

    /// Restore activity flags and areas from a snapshot of this structure.
    ///
    /// Entries beyond the size of the structure are ignored.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        for (node, active) in self.graph.node_weights_mut().zip(&snapshot.nodes) {
            node.active = *active;
        }
        for ((element, active), area) in self
            .graph
            .edge_weights_mut()
            .zip(&snapshot.elements)
            .zip(&snapshot.areas)
        {
            element.active = *active;
            element.area = *area;
        }
    }

    /// Look up a node or report it as unknown.
    fn checked_node(&self, node: NodeIndex) -> Result<&Node, StructureEditError> {
        self.graph
            .node_weight(node)
            .ok_or(StructureEditError::UnknownNode(node))
    }

    /// Mutable variant of [`Structure::checked_node`].
    fn checked_node_mut(&mut self, node: NodeIndex) -> Result<&mut Node, StructureEditError> {
        self.graph
            .node_weight_mut(node)
            .ok_or(StructureEditError::UnknownNode(node))
    }

    /// Look up an element mutably or report it as unknown.
    fn checked_element_mut(
        &mut self,
        element: EdgeIndex,
    ) -> Result<&mut Element, StructureEditError> {
        self.graph
            .edge_weight_mut(element)
            .ok_or(StructureEditError::UnknownElement(element))
    }
}

fn check_area(area: f64) -> Result<(), StructureEditError> {
    if area > 0.0 && area.is_finite() {
        Ok(())
    } else {
        Err(StructureEditError::InvalidElement(
            ElementPropertyError::NonPositiveArea { area },
        ))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::geometry::{force, point};
    use crate::material::steel;

    fn triangle() -> (Structure, [NodeIndex; 3]) {
        let mut structure = Structure::new(steel());
        let a = structure.add_node(point(0.0, 0.0));
        let b = structure.add_node(point(2.0, 0.0));
        let c = structure.add_node(point(1.0, 1.0));
        for (start, end) in [(a, b), (b, c), (a, c)] {
            structure
                .add_element(start, end, 1.0e-4)
                .expect("element accepted");
        }
        (structure, [a, b, c])
    }

    #[test]
    fn node_mutators_return_error_for_unknown_indices() {
        let (mut structure, _) = triangle();
        let missing = NodeIndex::new(10);
        assert_eq!(
            structure.set_support(missing, Support::Pinned),
            Err(StructureEditError::UnknownNode(missing))
        );
        assert_eq!(
            structure.set_load(missing, force(0.0, -1.0)),
            Err(StructureEditError::UnknownNode(missing))
        );
        assert_eq!(
            structure.set_node_mass(missing, Some(1.0)),
            Err(StructureEditError::UnknownNode(missing))
        );
    }

    #[test]
    fn invalid_elements_are_rejected() {
        let (mut structure, [a, b, _]) = triangle();
        let d = structure.add_node(point(0.0, 0.0));

        assert_eq!(
            structure.add_element(a, d, 1.0e-4),
            Err(StructureEditError::ZeroLengthElement(a, d))
        );
        assert_eq!(
            structure.add_element(b, a, 1.0e-4),
            Err(StructureEditError::DuplicateElement(b, a))
        );
        let e = structure.add_node(point(5.0, 5.0));
        assert!(matches!(
            structure.add_element(a, e, 0.0),
            Err(StructureEditError::InvalidElement(
                ElementPropertyError::NonPositiveArea { .. }
            ))
        ));
    }

    #[test]
    fn deactivated_nodes_switch_off_incident_elements() {
        let (mut structure, [a, _, c]) = triangle();
        assert_eq!(structure.active_elements().len(), 3);

        structure.deactivate_nodes(&[c]);
        assert_eq!(structure.active_node_count(), 2);
        assert_eq!(structure.active_elements().len(), 1);
        assert_eq!(structure.active_incident_elements(a).len(), 1);

        let restored = structure.reactivate_nodes(&[c]);
        assert_eq!(restored.len(), 2);
        assert_eq!(structure.active_elements().len(), 3);
    }

    #[test]
    fn reactivation_keeps_switched_off_elements_off() {
        let (mut structure, [a, b, c]) = triangle();
        let ac = structure.graph.find_edge(a, c).expect("edge exists");
        structure.set_element_active(ac, false).expect("known element");
        structure.deactivate_nodes(&[c]);

        let restored = structure.reactivate_nodes(&[c]);
        assert_eq!(restored, vec![structure.graph.find_edge(b, c).expect("edge")]);
        assert!(!structure.is_element_active(ac));
    }

    #[test]
    fn volume_and_mass_follow_active_elements() {
        let (mut structure, [_, _, c]) = triangle();
        let full = 2.0 + 2.0 * 2.0_f64.sqrt();
        assert_relative_eq!(structure.active_volume(), full * 1.0e-4, epsilon = 1.0e-12);
        assert_relative_eq!(
            structure.total_mass(),
            7850.0 * full * 1.0e-4,
            epsilon = 1.0e-9
        );

        structure.deactivate_nodes(&[c]);
        assert_relative_eq!(structure.active_volume(), 2.0e-4, epsilon = 1.0e-12);
    }

    #[test]
    fn free_dofs_skip_supports_and_inactive_nodes() {
        let (mut structure, [a, b, c]) = triangle();
        structure.set_support(a, Support::Pinned).expect("known node");
        structure.set_support(b, Support::PinnedY).expect("known node");
        assert_eq!(structure.free_dofs(), vec![2, 4, 5]);

        structure.deactivate_nodes(&[c]);
        assert_eq!(structure.free_dofs(), vec![2]);
    }

    #[test]
    fn load_vector_ignores_inactive_nodes() {
        let (mut structure, [_, b, c]) = triangle();
        structure.set_load(c, force(1.0, -2.0)).expect("known node");
        structure.set_load(b, force(3.0, 0.0)).expect("known node");
        structure.deactivate_nodes(&[b]);

        let load = structure.load_vector();
        assert_eq!(load.as_slice(), &[0.0, 0.0, 0.0, 0.0, 1.0, -2.0]);
    }

    #[test]
    fn snapshot_restores_flags_and_areas() {
        let (mut structure, [_, _, c]) = triangle();
        let snapshot = structure.snapshot();

        structure.deactivate_nodes(&[c]);
        structure
            .set_area(EdgeIndex::new(0), 5.0e-4)
            .expect("valid area");
        structure.restore(&snapshot);

        assert_eq!(structure.snapshot(), snapshot);
        assert_eq!(snapshot.active_node_count(), 3);
    }

    #[test]
    fn axial_extension_projects_relative_displacement() {
        let (structure, _) = triangle();
        let mut displacements = DVector::zeros(structure.dof_count());
        // node b moves +x by 1 mm, element a-b lies along x
        displacements[2] = 1.0e-3;
        assert_relative_eq!(
            structure.axial_extension(EdgeIndex::new(0), &displacements),
            1.0e-3
        );
    }

    #[test]
    fn support_flags_roundtrip() {
        for support in [
            Support::Free,
            Support::PinnedX,
            Support::PinnedY,
            Support::Pinned,
        ] {
            assert_eq!(
                Support::from_flags(support.fixes_x(), support.fixes_y()),
                support
            );
        }
    }
}
