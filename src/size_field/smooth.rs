//! Diffusive smoothing of nodal values.

use crate::algs::communicator::{Communicator, tags};
use crate::mesh::distributed::DistributedMesh;
use crate::mesh::field::SizeField;
use crate::mesh::sharing::reduce_shared;
use crate::mesh_error::MeshAdaptError;
use crate::overlap::delta::AddDelta;
use crate::topology::entity::EntityDim;

/// Apply `iterations` sweeps of `v ← (1 - w) v + w · mean(neighbours)` to
/// `width` values per vertex. Collective.
///
/// Neighbour sums run over owned edges only and are then added across
/// ranks, so a shared edge contributes once.
pub fn smooth_values<C: Communicator>(
    mesh: &DistributedMesh,
    values: &mut [f64],
    width: usize,
    iterations: usize,
    weight: f64,
    comm: &C,
) -> Result<(), MeshAdaptError> {
    let n = mesh.count(EntityDim::Vertex);
    if values.len() != n * width {
        return Err(MeshAdaptError::ShapeMismatch {
            what: "smoothed values",
            expected: n * width,
            found: values.len(),
        });
    }
    let owned_edges: Vec<[usize; 2]> = (0..mesh.count(EntityDim::Edge))
        .filter(|&e| mesh.is_owned(EntityDim::Edge, e))
        .map(|e| {
            let v = mesh.vertices(EntityDim::Edge, e);
            [v[0], v[1]]
        })
        .collect();

    let overlap = mesh.overlap();
    let mut degree = vec![0.0; n];
    for &[a, b] in &owned_edges {
        degree[a] += 1.0;
        degree[b] += 1.0;
    }
    reduce_shared::<AddDelta, C>(overlap, EntityDim::Vertex, comm, tags::SMOOTHING, &mut degree, 1)?;

    for _ in 0..iterations {
        let mut sums = vec![0.0; n * width];
        for &[a, b] in &owned_edges {
            for k in 0..width {
                sums[a * width + k] += values[b * width + k];
                sums[b * width + k] += values[a * width + k];
            }
        }
        reduce_shared::<AddDelta, C>(overlap, EntityDim::Vertex, comm, tags::SMOOTHING, &mut sums, width)?;
        for v in 0..n {
            if degree[v] == 0.0 {
                continue;
            }
            for k in 0..width {
                let i = v * width + k;
                values[i] = (1.0 - weight) * values[i] + weight * sums[i] / degree[v];
            }
        }
    }
    Ok(())
}

/// Smooth the sizes of a size field; anisotropic frames are left as they are.
pub fn smooth_size_field<C: Communicator>(
    mesh: &DistributedMesh,
    size: &mut SizeField,
    iterations: usize,
    weight: f64,
    comm: &C,
) -> Result<(), MeshAdaptError> {
    size.validate()?;
    let sizes = match size {
        SizeField::Isotropic(h) => h,
        SizeField::Anisotropic { scales, .. } => scales,
    };
    let width = sizes.components();
    smooth_values(mesh, sizes.values_mut(), width, iterations, weight, comm)?;
    log::debug!("[rank {}] size field smoothed ({iterations} sweeps, weight {weight})", comm.rank());
    Ok(())
}
