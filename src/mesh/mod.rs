//! The distributed mesh handle and the library-side mesh internals.

pub mod builder;
pub mod distributed;
pub mod field;
pub mod model;
pub mod sharing;

pub use builder::MeshBuilder;
pub use distributed::DistributedMesh;
pub use field::{NodeField, SizeField};
pub use model::GeometricModel;
