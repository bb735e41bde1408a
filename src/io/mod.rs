//! Readers and writers for geometric models and mesh files.
//!
//! Readers implement [`MeshFileReader`] over any [`Read`]; [`read_path`]
//! opens a file and reports failures as I/O errors carrying the path.

pub mod gmsh;
pub mod model;

use crate::mesh_error::MeshAdaptError;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// A reader producing `Output` from a byte stream.
pub trait MeshFileReader {
    type Output;

    fn read<R: Read>(&self, reader: R) -> Result<Self::Output, MeshAdaptError>;
}

/// Open `path` and read it with `reader`.
pub fn read_path<T: MeshFileReader>(reader: &T, path: impl AsRef<Path>) -> Result<T::Output, MeshAdaptError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|err| MeshAdaptError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    reader.read(BufReader::new(file)).map_err(|err| match err {
        MeshAdaptError::Io { message, .. } => MeshAdaptError::Io {
            path: path.display().to_string(),
            message,
        },
        other => other,
    })
}
