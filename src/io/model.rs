//! JSON geometric model files.
//!
//! ```json
//! { "dimension": 2,
//!   "entities": [{"dim": 2, "tag": 1}, {"dim": 1, "tag": 3}],
//!   "boundary_ids": {"3": 30} }
//! ```

use crate::io::MeshFileReader;
use crate::mesh::model::GeometricModel;
use crate::mesh_error::MeshAdaptError;
use std::io::Read;

#[derive(Debug, Default, Clone)]
pub struct ModelReader;

impl MeshFileReader for ModelReader {
    type Output = GeometricModel;

    fn read<R: Read>(&self, reader: R) -> Result<GeometricModel, MeshAdaptError> {
        let model: GeometricModel =
            serde_json::from_reader(reader).map_err(|err| MeshAdaptError::ModelParse(err.to_string()))?;
        if !(1..=3).contains(&model.dimension) {
            return Err(MeshAdaptError::ModelParse(format!(
                "model dimension {} is not 1, 2 or 3",
                model.dimension
            )));
        }
        if let Some(bad) = model.entities.iter().find(|e| e.dim as usize > model.dimension) {
            return Err(MeshAdaptError::ModelParse(format!(
                "entity ({}, {}) exceeds the model dimension {}",
                bad.dim, bad.tag, model.dimension
            )));
        }
        Ok(model)
    }
}
