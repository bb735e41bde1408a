//! Communication plumbing and mesh utilities.

pub mod communicator;
pub mod exchange;
pub mod meshgen;
pub mod partition;
pub mod wire;

pub use communicator::{Communicator, LocalComm, NoComm};
