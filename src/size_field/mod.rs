//! Size field engine: isotropic and anisotropic target sizes, smoothing.
//!
//! Every computation here is collective. Values of shared vertices come out
//! identical on every copy as long as the source field is, but a size field
//! must still go through [`sync_size_field`] before a multi-rank adaptation.
//!
//! [`sync_size_field`]: crate::field_transfer::sync_size_field

pub mod aniso;
pub mod recovery;
pub mod smooth;

use crate::algs::communicator::{Communicator, tags};
use crate::config::{AdaptParameters, DriverConfig, SizeMetric};
use crate::mesh::distributed::DistributedMesh;
use crate::mesh::field::{NodeField, SizeField};
use crate::mesh::sharing::reduce_shared;
use crate::mesh_error::MeshAdaptError;
use crate::overlap::delta::AddDelta;
use crate::topology::entity::EntityDim;

pub use aniso::anisotropic_size_field;
pub use recovery::{recover_gradients, recover_hessians};
pub use smooth::{smooth_size_field, smooth_values};

/// Name of the isotropic size field.
pub const SIZE_FIELD_NAME: &str = "size";

/// One component of a node field as a flat per-vertex array.
pub fn component_values(field: &NodeField, component: usize) -> Result<Vec<f64>, MeshAdaptError> {
    if component >= field.components() {
        return Err(MeshAdaptError::ShapeMismatch {
            what: "field component",
            expected: field.components(),
            found: component,
        });
    }
    Ok((0..field.num_nodes()).map(|v| field.node(v)[component]).collect())
}

/// Mean length of the edges incident to each vertex. Collective.
pub fn mean_edge_lengths<C: Communicator>(mesh: &DistributedMesh, comm: &C) -> Result<Vec<f64>, MeshAdaptError> {
    let n = mesh.count(EntityDim::Vertex);
    let mut sums = vec![0.0; n];
    let mut counts = vec![0.0; n];
    for e in 0..mesh.count(EntityDim::Edge) {
        if !mesh.is_owned(EntityDim::Edge, e) {
            continue;
        }
        let length = mesh.edge_length(e);
        for &v in mesh.vertices(EntityDim::Edge, e) {
            sums[v] += length;
            counts[v] += 1.0;
        }
    }
    let overlap = mesh.overlap();
    reduce_shared::<AddDelta, C>(overlap, EntityDim::Vertex, comm, tags::SIZE_FIELD, &mut sums, 1)?;
    reduce_shared::<AddDelta, C>(overlap, EntityDim::Vertex, comm, tags::SIZE_FIELD, &mut counts, 1)?;
    Ok(sums
        .iter()
        .zip(&counts)
        .map(|(s, c)| if *c > 0.0 { s / c } else { 0.0 })
        .collect())
}

/// Isotropic size field bounded to `[hmin, hmax]`. Collective.
///
/// `source` names the node field read by the solution-based metrics.
pub fn isotropic_size_field<C: Communicator>(
    mesh: &DistributedMesh,
    source: &str,
    params: &AdaptParameters,
    config: &DriverConfig,
    comm: &C,
) -> Result<SizeField, MeshAdaptError> {
    params.validate()?;
    let raw: Vec<f64> = match params.metric {
        SizeMetric::EdgeLengthScale { factor } => mean_edge_lengths(mesh, comm)?
            .into_iter()
            .map(|h| factor * h)
            .collect(),
        SizeMetric::InterfaceBand { component, band_width } => {
            component_values(mesh.field(source)?, component)?
                .into_iter()
                .map(|u| if u.abs() <= band_width { config.hmin } else { config.hmax })
                .collect()
        }
        SizeMetric::GradientError { component, target_error } => {
            let values = component_values(mesh.field(source)?, component)?;
            recover_gradients(mesh, &values, comm)?
                .into_iter()
                .map(|g| {
                    let slope = crate::mesh::field::norm(g);
                    if slope > 0.0 { target_error / slope } else { config.hmax }
                })
                .collect()
        }
    };
    let mut sizes: Vec<f64> = raw.into_iter().map(|h| config.clamp(h)).collect();
    if params.smoothing_iterations > 0 {
        smooth_values(mesh, &mut sizes, 1, params.smoothing_iterations, params.smoothing_weight, comm)?;
        for h in &mut sizes {
            *h = config.clamp(*h);
        }
    }
    let size = SizeField::Isotropic(NodeField::from_values(SIZE_FIELD_NAME, 1, sizes)?);
    size.validate()?;
    log::info!("[rank {}] isotropic size field computed ({:?})", comm.rank(), params.metric);
    Ok(size)
}
