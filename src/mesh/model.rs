//! Geometric model: the set of model entities mesh entities are classified on.

use crate::topology::entity::{Classification, EntityDim};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A discrete geometric model.
///
/// Only the entity list matters to the driver: classifications are checked for
/// membership, and `boundary_ids` seeds the boundary-id map used when the
/// solver's material arrays are written.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometricModel {
    pub dimension: usize,
    pub entities: BTreeSet<Classification>,
    #[serde(default)]
    pub boundary_ids: BTreeMap<i32, i32>,
}

impl GeometricModel {
    pub fn contains(&self, class: Classification) -> bool {
        self.entities.contains(&class)
    }
}

/// Check that an entity of `entity_dim` may be classified on `class`.
///
/// Returns the reason when it may not.
pub fn check_classification(
    entity_dim: EntityDim,
    class: Classification,
    mesh_dim: usize,
    model: Option<&GeometricModel>,
) -> Result<(), String> {
    let dim = class.dim as usize;
    if dim < entity_dim.dim() {
        return Err(format!(
            "model entity ({}, {}) is lower-dimensional than the mesh entity",
            class.dim, class.tag
        ));
    }
    if dim > mesh_dim {
        return Err(format!(
            "model entity ({}, {}) exceeds the mesh dimension {mesh_dim}",
            class.dim, class.tag
        ));
    }
    match model {
        Some(model) if !model.contains(class) => Err(format!(
            "model entity ({}, {}) does not exist in the geometric model",
            class.dim, class.tag
        )),
        _ => Ok(()),
    }
}
