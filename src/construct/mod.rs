//! Mesh construction in both directions.
//!
//! [`import`] turns solver arrays (or a mesh file) into a [`DistributedMesh`];
//! [`rebuild`] writes a distributed mesh and its numbering back into solver
//! arrays.
//!
//! [`DistributedMesh`]: crate::mesh::DistributedMesh

pub mod import;
pub mod rebuild;

pub use import::{import_gmsh, import_parallel, import_serial};
pub use rebuild::{BoundaryIds, rebuild_parallel, rebuild_serial};
