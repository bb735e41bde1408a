#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-adapt-driver
//!
//! mesh-adapt-driver sits between a finite-element solver that stores its
//! mesh as flat integer and float arrays and a mesh-adaptation library that
//! works on a classified, distributed mesh. It converts between the two
//! representations, moves nodal solution fields back and forth, computes
//! target size fields and drives adaptation, serially or over MPI.
//!
//! ## Features
//! - Flat solver arrays ([`SolverMesh`]) built from and rebuilt into a
//!   classified [`DistributedMesh`]
//! - Global numbering of owned entities with per-rank offsets
//! - Isotropic and anisotropic size fields with smoothing and bounds
//! - A pluggable [`AdaptService`](adapt::AdaptService) with an edge-split
//!   reference implementation
//! - Pluggable communication backends: serial, in-process ranks, MPI
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-adapt-driver = "0.1"
//! # features = ["mpi-support"]
//! ```
//!
//! A typical cycle: construct the driver from the solver mesh, transfer the
//! solution in, compute and synchronise a size field, adapt, rebuild the
//! solver mesh and transfer the interpolated solution back out.

pub mod adapt;
pub mod algs;
pub mod config;
pub mod construct;
pub mod driver;
pub mod field_transfer;
pub mod geometry;
pub mod io;
pub mod mesh;
pub mod mesh_error;
pub mod numbering;
pub mod overlap;
pub mod size_field;
pub mod solver_mesh;
pub mod topology;

pub use driver::{MeshAdaptDriver, MeshState};
pub use mesh::DistributedMesh;
pub use mesh_error::MeshAdaptError;
pub use solver_mesh::SolverMesh;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::adapt::{AdaptReport, AdaptService, EdgeSplitAdapter};
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::config::{AdaptParameters, AnisotropyBounds, DriverConfig, FieldLayout, SizeMetric};
    pub use crate::driver::{MeshAdaptDriver, MeshState};
    pub use crate::mesh::{DistributedMesh, GeometricModel, NodeField, SizeField};
    pub use crate::mesh_error::{ErrorKind, MeshAdaptError};
    pub use crate::numbering::NumberingTables;
    pub use crate::solver_mesh::SolverMesh;
    pub use crate::topology::{CellType, Classification, EntityDim};
}
