//! Entity dimensions, classification, cell templates and ownership.

pub mod cell_type;
pub mod entity;
pub mod ownership;

pub use cell_type::CellType;
pub use entity::{Classification, EntityDim};
pub use ownership::EntityOwnership;
