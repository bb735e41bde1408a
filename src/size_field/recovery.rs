//! Vertex gradient recovery.
//!
//! The gradient at a vertex is the measure-weighted mean of the linear
//! gradients of the simplices around it (quads and hexes are split first).
//! Each rank sums over its own elements; the partial sums of shared vertices
//! are then added across ranks, so every copy ends up with the full average.

use crate::algs::communicator::{Communicator, tags};
use crate::geometry::metrics::{simplex_gradient, simplex_measure};
use crate::mesh::distributed::DistributedMesh;
use crate::mesh::sharing::reduce_shared;
use crate::mesh_error::MeshAdaptError;
use crate::overlap::delta::AddDelta;
use crate::topology::entity::EntityDim;

/// Recovered gradient of the nodal `values` at every local vertex. Collective.
pub fn recover_gradients<C: Communicator>(
    mesh: &DistributedMesh,
    values: &[f64],
    comm: &C,
) -> Result<Vec<[f64; 3]>, MeshAdaptError> {
    let n = mesh.count(EntityDim::Vertex);
    if values.len() != n {
        return Err(MeshAdaptError::ShapeMismatch {
            what: "recovery input",
            expected: n,
            found: values.len(),
        });
    }
    let ed = mesh.element_dim();
    let cell = mesh.cell_type();
    let mut sums = vec![0.0; 3 * n];
    let mut weights = vec![0.0; n];
    for e in 0..mesh.count(ed) {
        let verts = mesh.vertices(ed, e);
        for simplex in cell.simplices() {
            let local: Vec<usize> = simplex.iter().map(|&l| verts[l]).collect();
            let pts: Vec<[f64; 3]> = local.iter().map(|&v| mesh.coords(v)).collect();
            let vals: Vec<f64> = local.iter().map(|&v| values[v]).collect();
            let Some(g) = simplex_gradient(&pts, &vals) else {
                continue;
            };
            let w = simplex_measure(&pts);
            for &v in &local {
                for k in 0..3 {
                    sums[3 * v + k] += w * g[k];
                }
                weights[v] += w;
            }
        }
    }

    let overlap = mesh.overlap();
    reduce_shared::<AddDelta, C>(overlap, EntityDim::Vertex, comm, tags::RECOVERY, &mut sums, 3)?;
    reduce_shared::<AddDelta, C>(overlap, EntityDim::Vertex, comm, tags::RECOVERY, &mut weights, 1)?;

    Ok((0..n)
        .map(|v| {
            if weights[v] > 0.0 {
                [sums[3 * v] / weights[v], sums[3 * v + 1] / weights[v], sums[3 * v + 2] / weights[v]]
            } else {
                [0.0; 3]
            }
        })
        .collect())
}

/// Recovered, symmetrised Hessian at every vertex, row-major `dim × dim`.
///
/// The gradient recovery is applied once more to every gradient component.
pub fn recover_hessians<C: Communicator>(
    mesh: &DistributedMesh,
    values: &[f64],
    comm: &C,
) -> Result<Vec<Vec<f64>>, MeshAdaptError> {
    let dim = mesh.dim();
    let gradients = recover_gradients(mesh, values, comm)?;
    let mut rows = Vec::with_capacity(dim);
    for i in 0..dim {
        let component: Vec<f64> = gradients.iter().map(|g| g[i]).collect();
        rows.push(recover_gradients(mesh, &component, comm)?);
    }
    Ok((0..values.len())
        .map(|v| {
            let mut h = vec![0.0; dim * dim];
            for i in 0..dim {
                for j in 0..dim {
                    h[i * dim + j] = 0.5 * (rows[i][v][j] + rows[j][v][i]);
                }
            }
            h
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::meshgen::unit_square;
    use crate::construct::import::import_serial;
    use crate::topology::cell_type::CellType;
    use approx::assert_relative_eq;

    #[test]
    fn linear_field_gradient_is_exact_everywhere() {
        for cell in [CellType::Triangle, CellType::Quadrilateral] {
            let mesh = import_serial(&unit_square(3, 3, cell).unwrap(), None).unwrap();
            let values: Vec<f64> = mesh.coordinates().iter().map(|p| 2.0 * p[0] - 0.5 * p[1]).collect();
            for g in recover_gradients(&mesh, &values, &NoComm).unwrap() {
                assert_relative_eq!(g[0], 2.0, epsilon = 1e-10);
                assert_relative_eq!(g[1], -0.5, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn linear_field_has_zero_hessian() {
        let mesh = import_serial(&unit_square(2, 2, CellType::Triangle).unwrap(), None).unwrap();
        let values: Vec<f64> = mesh.coordinates().iter().map(|p| p[0] + p[1]).collect();
        for h in recover_hessians(&mesh, &values, &NoComm).unwrap() {
            assert_eq!(h.len(), 4);
            assert!(h.iter().all(|v| v.abs() < 1e-10));
        }
    }
}
