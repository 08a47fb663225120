//! Plain data documents for structures and optimisation histories.
//!
//! Nodes and elements are stored as column arrays so large grids stay compact and easy to read
//! from other tools. Index `i` of every node column describes node `i`.

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::errors::CodecError;
use crate::geometry::{force, point};
use crate::material::MaterialProperties;
use crate::optimizer::{IterationRecord, OptimizationOutcome, Strategy, TerminationReason};
use crate::structure::{Structure, Support};

/// Format tag written into every structure document.
pub const STRUCTURE_FORMAT: &str = "structure_v2_arrays";

/// Node columns of a [`StructureDocument`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeColumns {
    /// X coordinates in metres.
    pub x: Vec<f64>,
    /// Y coordinates in metres.
    pub y: Vec<f64>,
    /// Load components along X in newtons; empty means unloaded.
    #[serde(default)]
    pub fx: Vec<f64>,
    /// Load components along Y in newtons; empty means unloaded.
    #[serde(default)]
    pub fy: Vec<f64>,
    /// X restraint flags; empty means free.
    #[serde(default)]
    pub fix_x: Vec<bool>,
    /// Y restraint flags; empty means free.
    #[serde(default)]
    pub fix_y: Vec<bool>,
    /// Lumped mass overrides; empty means none.
    #[serde(default)]
    pub mass: Vec<Option<f64>>,
    /// Activity flags; empty means all active.
    #[serde(default)]
    pub active: Vec<bool>,
}

/// Element columns of a [`StructureDocument`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementColumns {
    /// First endpoint index.
    pub i: Vec<usize>,
    /// Second endpoint index.
    pub j: Vec<usize>,
    /// Cross-sectional areas in square metres.
    pub area: Vec<f64>,
    /// Element flags; empty means all switched on.
    #[serde(default)]
    pub active: Vec<bool>,
}

/// Serialisable description of a [`Structure`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructureDocument {
    /// Always [`STRUCTURE_FORMAT`].
    pub format: String,
    /// Material shared by every element.
    pub material: MaterialProperties,
    /// Node data.
    pub nodes: NodeColumns,
    /// Element data.
    pub elements: ElementColumns,
}

impl StructureDocument {
    /// Capture every node and element of `structure`, inactive ones included.
    #[must_use]
    pub fn from_structure(structure: &Structure) -> Self {
        let mut nodes = NodeColumns::default();
        for index in structure.node_indices() {
            let Some(node) = structure.node(index) else {
                continue;
            };
            nodes.x.push(node.position.x);
            nodes.y.push(node.position.y);
            nodes.fx.push(node.load.x);
            nodes.fy.push(node.load.y);
            nodes.fix_x.push(node.support.fixes_x());
            nodes.fix_y.push(node.support.fixes_y());
            nodes.mass.push(node.mass);
            nodes.active.push(node.active);
        }

        let mut elements = ElementColumns::default();
        for index in structure.element_indices() {
            let (Some((a, b)), Some(element)) =
                (structure.endpoints(index), structure.element(index))
            else {
                continue;
            };
            elements.i.push(a.index());
            elements.j.push(b.index());
            elements.area.push(element.area);
            elements.active.push(element.active);
        }

        Self {
            format: STRUCTURE_FORMAT.to_string(),
            material: *structure.material(),
            nodes,
            elements,
        }
    }

    /// Rebuild the structure, keeping node and element indices.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for an unknown format, columns of different lengths, element
    /// references to missing nodes, invalid material or invalid elements.
    ///
    /// # Examples
    /// ```
    /// use trusstopo::{force, steel, GridSpec, StructureDocument};
    ///
    /// let grid = GridSpec::default();
    /// let mut structure = grid.build(steel()).unwrap();
    /// grid.apply_simply_supported(&mut structure, force(0.0, -1.0e3)).unwrap();
    ///
    /// let text = StructureDocument::from_structure(&structure).to_json().unwrap();
    /// let restored = StructureDocument::from_json(&text).unwrap().to_structure().unwrap();
    /// assert_eq!(restored.element_count(), structure.element_count());
    /// assert_eq!(restored.loaded_nodes(), structure.loaded_nodes());
    /// ```
    pub fn to_structure(&self) -> Result<Structure, CodecError> {
        if self.format != STRUCTURE_FORMAT {
            return Err(CodecError::UnsupportedFormat(self.format.clone()));
        }
        self.material.validate()?;
        let nodes = &self.nodes;
        let count = nodes.x.len();
        check_column("nodes.y", nodes.y.len(), count)?;
        check_optional("nodes.fx", nodes.fx.len(), count)?;
        check_optional("nodes.fy", nodes.fy.len(), count)?;
        check_optional("nodes.fix_x", nodes.fix_x.len(), count)?;
        check_optional("nodes.fix_y", nodes.fix_y.len(), count)?;
        check_optional("nodes.mass", nodes.mass.len(), count)?;
        check_optional("nodes.active", nodes.active.len(), count)?;
        let elements = &self.elements;
        let element_count = elements.i.len();
        check_column("elements.j", elements.j.len(), element_count)?;
        check_column("elements.area", elements.area.len(), element_count)?;
        check_optional("elements.active", elements.active.len(), element_count)?;

        let mut structure = Structure::new(self.material);
        for idx in 0..count {
            let node = structure.add_node(point(nodes.x[idx], nodes.y[idx]));
            let load = force(
                nodes.fx.get(idx).copied().unwrap_or(0.0),
                nodes.fy.get(idx).copied().unwrap_or(0.0),
            );
            let support = Support::from_flags(
                nodes.fix_x.get(idx).copied().unwrap_or(false),
                nodes.fix_y.get(idx).copied().unwrap_or(false),
            );
            structure.set_load(node, load)?;
            structure.set_support(node, support)?;
            structure.set_node_mass(node, nodes.mass.get(idx).copied().flatten())?;
        }
        for idx in 0..element_count {
            let (start, end) = (elements.i[idx], elements.j[idx]);
            if start >= count || end >= count {
                return Err(CodecError::Inconsistent(format!(
                    "element {idx} references node {} but only {count} nodes exist",
                    start.max(end)
                )));
            }
            let element =
                structure.add_element(NodeIndex::new(start), NodeIndex::new(end), elements.area[idx])?;
            if !elements.active.get(idx).copied().unwrap_or(true) {
                structure.set_element_active(element, false)?;
            }
        }
        let inactive: Vec<NodeIndex> = (0..count)
            .filter(|idx| !nodes.active.get(*idx).copied().unwrap_or(true))
            .map(NodeIndex::new)
            .collect();
        structure.deactivate_nodes(&inactive);
        Ok(structure)
    }

    /// Serialise to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] when serialisation fails.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] for malformed input.
    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}

fn check_column(name: &str, len: usize, expected: usize) -> Result<(), CodecError> {
    if len == expected {
        Ok(())
    } else {
        Err(CodecError::Inconsistent(format!(
            "column {name} has {len} entries, expected {expected}"
        )))
    }
}

fn check_optional(name: &str, len: usize, expected: usize) -> Result<(), CodecError> {
    if len == 0 {
        Ok(())
    } else {
        check_column(name, len, expected)
    }
}

/// Input structure together with the recorded history of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    /// Strategy that produced the history.
    pub strategy: Strategy,
    /// Structure the run started from.
    pub structure: StructureDocument,
    /// Accepted iterations in order.
    pub records: Vec<IterationRecord>,
    /// Why the run stopped.
    pub termination: TerminationReason,
}

impl HistoryDocument {
    /// Bundle a finished run with the structure it started from.
    #[must_use]
    pub fn from_outcome(strategy: Strategy, input: &Structure, outcome: &OptimizationOutcome) -> Self {
        Self {
            strategy,
            structure: StructureDocument::from_structure(input),
            records: outcome.history.clone(),
            termination: outcome.termination,
        }
    }

    /// Structure as it was after record `position` of the history.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Inconsistent`] when the record does not exist or its snapshot does
    /// not match the stored structure.
    pub fn replay(&self, position: usize) -> Result<Structure, CodecError> {
        let mut structure = self.structure.to_structure()?;
        let record = self.records.get(position).ok_or_else(|| {
            CodecError::Inconsistent(format!(
                "history has {} records, requested {position}",
                self.records.len()
            ))
        })?;
        let snapshot = &record.snapshot;
        if snapshot.nodes.len() != structure.node_count()
            || snapshot.elements.len() != structure.element_count()
            || snapshot.areas.len() != structure.element_count()
        {
            return Err(CodecError::Inconsistent(format!(
                "snapshot of iteration {} does not match the structure",
                record.iteration
            )));
        }
        structure.restore(snapshot);
        Ok(structure)
    }

    /// Serialise to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] when serialisation fails.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a history from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] for malformed input.
    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}
