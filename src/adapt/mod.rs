//! Adaptation service interface and the reference edge-split adapter.
//!
//! An [`AdaptService`] consumes one rank's mesh and a synchronised size field
//! and returns a *new* mesh; the caller's mesh is never modified, so a failed
//! adaptation leaves the driver exactly as it was. Node fields attached to
//! the input mesh must come back interpolated onto the new vertices.
//!
//! `adapt` is collective: every rank calls it with its own part.

pub mod split;

use crate::algs::communicator::Communicator;
use crate::mesh::distributed::DistributedMesh;
use crate::mesh::field::SizeField;
use crate::mesh_error::MeshAdaptError;

pub use split::EdgeSplitAdapter;

/// Limits of one adaptation call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdaptRequest {
    /// Upper bound on refinement passes.
    pub max_iterations: usize,
}

/// Summary of one adaptation call, identical on every rank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdaptReport {
    /// Passes that changed the mesh.
    pub passes: usize,
    /// Edges split over all passes and ranks.
    pub split_edges: usize,
    /// Global element count before the call.
    pub elements_before: usize,
    /// Global element count after the call.
    pub elements_after: usize,
    /// `false` when the pass bound was reached with edges still marked.
    pub converged: bool,
}

/// The new mesh and what it took to produce it.
#[derive(Clone, Debug)]
pub struct AdaptOutcome {
    pub mesh: DistributedMesh,
    pub report: AdaptReport,
}

/// A remeshing engine driven by a size field.
pub trait AdaptService {
    fn adapt<C: Communicator>(
        &self,
        mesh: &DistributedMesh,
        size: &SizeField,
        request: &AdaptRequest,
        comm: &C,
    ) -> Result<AdaptOutcome, MeshAdaptError>;
}
