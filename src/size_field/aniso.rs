//! Hessian-based anisotropic sizes.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::agree;
use crate::config::{AnisotropyBounds, DriverConfig};
use crate::mesh::distributed::DistributedMesh;
use crate::mesh::field::{NodeField, SizeField};
use crate::mesh_error::MeshAdaptError;
use crate::size_field::recovery::recover_hessians;
use nalgebra::{DMatrix, SymmetricEigen};

/// Principal sizes and directions of one symmetric Hessian.
///
/// Sizes are `sqrt(target_error / |λ|)` clamped to `[hmin, hmax]` (a zero
/// eigenvalue gives `hmax`), then the smaller ones are raised so that no
/// ratio exceeds `bounds.max_ratio`. Directions are returned row-major.
pub fn principal_sizes(
    hessian: &[f64],
    dim: usize,
    bounds: &AnisotropyBounds,
    config: &DriverConfig,
) -> (Vec<f64>, Vec<f64>) {
    let matrix = DMatrix::from_row_slice(dim, dim, hessian);
    let eigen = SymmetricEigen::new(matrix);

    let mut sizes: Vec<f64> = eigen
        .eigenvalues
        .iter()
        .map(|&lambda| {
            let lambda = lambda.abs();
            if lambda > f64::EPSILON {
                config.clamp((bounds.target_error / lambda).sqrt())
            } else {
                config.hmax
            }
        })
        .collect();
    let largest = sizes.iter().copied().fold(0.0, f64::max);
    let floor = largest / bounds.max_ratio;
    for h in &mut sizes {
        *h = config.clamp(h.max(floor));
    }

    let mut frame = vec![0.0; dim * dim];
    for i in 0..dim {
        let column = eigen.eigenvectors.column(i);
        for k in 0..dim {
            frame[i * dim + k] = column[k];
        }
    }
    (sizes, frame)
}

/// Anisotropic size field of the nodal `values`. Collective.
pub fn anisotropic_size_field<C: Communicator>(
    mesh: &DistributedMesh,
    values: &[f64],
    bounds: &AnisotropyBounds,
    config: &DriverConfig,
    comm: &C,
) -> Result<SizeField, MeshAdaptError> {
    let finite = match values.iter().position(|u| !u.is_finite()) {
        Some(v) => Err(MeshAdaptError::InvalidSizeField(format!(
            "node {v} has source value {}",
            values[v]
        ))),
        None => Ok(()),
    };
    agree(comm, "anisotropic size source", finite)?;

    let dim = mesh.dim();
    let hessians = recover_hessians(mesh, values, comm)?;
    let mut scales = Vec::with_capacity(dim * hessians.len());
    let mut frames = Vec::with_capacity(dim * dim * hessians.len());
    for (v, h) in hessians.iter().enumerate() {
        if h.iter().any(|x| !x.is_finite()) {
            return Err(MeshAdaptError::InvalidSizeField(format!(
                "node {v} has a non-finite recovered Hessian"
            )));
        }
        let (sizes, frame) = principal_sizes(h, dim, bounds, config);
        scales.extend(sizes);
        frames.extend(frame);
    }
    let size = SizeField::Anisotropic {
        scales: NodeField::from_values("size_scales", dim, scales)?,
        frames: NodeField::from_values("size_frames", dim * dim, frames)?,
    };
    size.validate()?;
    Ok(size)
}
