//! Field transfer between solver flat buffers and node fields.
//!
//! A solver buffer holds `num_vars * num_nodes` values in a [`FieldLayout`];
//! its node index is the vertex's local ordinal (owned vertices first). Every
//! shape check runs before any value is copied, so a rejected transfer leaves
//! both sides untouched.

use crate::algs::communicator::{Communicator, tags};
use crate::config::FieldLayout;
use crate::mesh::distributed::DistributedMesh;
use crate::mesh::field::{NodeField, SizeField};
use crate::mesh::sharing::{broadcast_owned, reduce_shared};
use crate::mesh_error::MeshAdaptError;
use crate::numbering::LocalNumbering;
use crate::overlap::delta::MinDelta;
use crate::topology::entity::EntityDim;

/// Shape of a solver buffer as declared by the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BufferShape {
    pub num_vars: usize,
    pub num_nodes: usize,
}

impl BufferShape {
    pub fn new(num_vars: usize, num_nodes: usize) -> Self {
        Self { num_vars, num_nodes }
    }

    fn check(&self, vertices: &LocalNumbering, buffer_len: usize) -> Result<(), MeshAdaptError> {
        if self.num_nodes != vertices.len() {
            return Err(MeshAdaptError::ShapeMismatch {
                what: "num_nodes",
                expected: vertices.len(),
                found: self.num_nodes,
            });
        }
        if self.num_vars == 0 {
            return Err(MeshAdaptError::ShapeMismatch {
                what: "num_vars",
                expected: 1,
                found: 0,
            });
        }
        // an overflowing product can never match a real buffer
        let expected = self.num_vars.checked_mul(self.num_nodes).unwrap_or(usize::MAX);
        if buffer_len != expected || expected == usize::MAX {
            return Err(MeshAdaptError::ShapeMismatch {
                what: "buffer length",
                expected,
                found: buffer_len,
            });
        }
        Ok(())
    }
}

/// Copy `buffer` into the node field `name`.
///
/// The first transfer under a name declares the field and fixes its
/// component count; later transfers must match it.
pub fn transfer_to_library(
    mesh: &mut DistributedMesh,
    vertices: &LocalNumbering,
    name: &str,
    buffer: &[f64],
    shape: BufferShape,
    layout: FieldLayout,
) -> Result<(), MeshAdaptError> {
    shape.check(vertices, buffer.len())?;
    match mesh.field(name).map(NodeField::components) {
        Ok(components) if components != shape.num_vars => {
            return Err(MeshAdaptError::ShapeMismatch {
                what: "num_vars",
                expected: components,
                found: shape.num_vars,
            });
        }
        Ok(_) => {}
        Err(_) => {
            let n = mesh.count(EntityDim::Vertex);
            mesh.attach_field(NodeField::zeros(name, shape.num_vars, n))?;
        }
    }

    let field = mesh.field_mut(name)?;
    for (ordinal, &vertex) in vertices.order().iter().enumerate() {
        let node = field.node_mut(vertex);
        for (var, value) in node.iter_mut().enumerate() {
            *value = buffer[layout.index(ordinal, var, shape.num_nodes, shape.num_vars)];
        }
    }
    log::debug!("[rank {}] field `{name}` copied into the library", mesh.rank());
    Ok(())
}

/// Copy the node field `name` into `buffer`.
pub fn transfer_to_solver(
    mesh: &DistributedMesh,
    vertices: &LocalNumbering,
    name: &str,
    buffer: &mut [f64],
    shape: BufferShape,
    layout: FieldLayout,
) -> Result<(), MeshAdaptError> {
    let field = mesh.field(name)?;
    shape.check(vertices, buffer.len())?;
    if field.components() != shape.num_vars {
        return Err(MeshAdaptError::ShapeMismatch {
            what: "num_vars",
            expected: field.components(),
            found: shape.num_vars,
        });
    }
    for (ordinal, &vertex) in vertices.order().iter().enumerate() {
        for (var, &value) in field.node(vertex).iter().enumerate() {
            buffer[layout.index(ordinal, var, shape.num_nodes, shape.num_vars)] = value;
        }
    }
    Ok(())
}

/// Make every copy of a shared vertex agree on its size. Collective.
///
/// Isotropic sizes take the minimum over all copies; anisotropic sizes and
/// frames take the owner's value.
pub fn sync_size_field<C: Communicator>(
    mesh: &DistributedMesh,
    size: &mut SizeField,
    comm: &C,
) -> Result<(), MeshAdaptError> {
    let n = mesh.count(EntityDim::Vertex);
    if size.num_nodes() != n {
        return Err(MeshAdaptError::ShapeMismatch {
            what: "size field nodes",
            expected: n,
            found: size.num_nodes(),
        });
    }
    let overlap = mesh.overlap();
    match size {
        SizeField::Isotropic(h) => {
            reduce_shared::<MinDelta, C>(overlap, EntityDim::Vertex, comm, tags::SIZE_FIELD, h.values_mut(), 1)?;
        }
        SizeField::Anisotropic { scales, frames } => {
            let width = scales.components();
            broadcast_owned(overlap, EntityDim::Vertex, comm, tags::SIZE_FIELD, scales.values_mut(), width)?;
            let width = frames.components();
            broadcast_owned(overlap, EntityDim::Vertex, comm, tags::SIZE_FIELD, frames.values_mut(), width)?;
        }
    }
    log::debug!(
        "[rank {}] size field synchronised over {} shared vertices",
        comm.rank(),
        overlap.shared_count(EntityDim::Vertex)
    );
    Ok(())
}
