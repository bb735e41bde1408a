//! Distributed mesh → solver mesh.
//!
//! Every array is written in local-numbering order, owned entities first.
//! The `construct_*` steps each fill one slice of the solver mesh and must run
//! in the order [`rebuild_serial`] uses: elements, nodes, boundaries, edges,
//! materials, global numbering, global structures, then [`init_solver_mesh`].

use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::all_gather;
use crate::geometry::metrics::diameter;
use crate::mesh::distributed::DistributedMesh;
use crate::mesh_error::{MeshAdaptError, to_index};
use crate::numbering::NumberingTables;
use crate::solver_mesh::SolverMesh;
use crate::topology::entity::{Classification, EntityDim};
use std::collections::{BTreeMap, BTreeSet};

/// Model tag → boundary id written to the material arrays (identity when absent).
pub type BoundaryIds = BTreeMap<i32, i32>;

fn boundary_id(ids: &BoundaryIds, tag: i32) -> i32 {
    ids.get(&tag).copied().unwrap_or(tag)
}

fn ordinals_to_index(ordinals: impl Iterator<Item = usize>) -> Result<Vec<i32>, MeshAdaptError> {
    ordinals.map(to_index).collect()
}

/// Element connectivity and element → boundary incidence.
pub fn construct_elements(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    out: &mut SolverMesh,
) -> Result<(), MeshAdaptError> {
    let cell = mesh.cell_type();
    let (ed, bd) = (mesh.element_dim(), mesh.boundary_dim());
    let elements = numbering.local(ed)?;
    let vertices = numbering.local(EntityDim::Vertex)?;
    let boundaries = numbering.local(bd)?;

    out.n_elements_global = elements.len();
    out.n_nodes_element = cell.vertex_count();
    out.n_nodes_element_boundary = cell.boundary_vertex_count();
    out.n_element_boundaries_element = cell.boundaries().len();
    out.element_nodes_array = ordinals_to_index(
        elements
            .order()
            .iter()
            .flat_map(|&e| mesh.vertices(ed, e).iter().map(|&v| vertices.ordinal(v))),
    )?;
    out.element_boundaries_array = ordinals_to_index(
        elements
            .order()
            .iter()
            .flat_map(|&e| mesh.downward(e, bd).iter().map(|&b| boundaries.ordinal(b))),
    )?;
    Ok(())
}

/// Node coordinates.
pub fn construct_nodes(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    out: &mut SolverMesh,
) -> Result<(), MeshAdaptError> {
    let vertices = numbering.local(EntityDim::Vertex)?;
    out.n_nodes_global = vertices.len();
    out.node_array = vertices
        .order()
        .iter()
        .flat_map(|&v| mesh.coords(v))
        .collect();
    Ok(())
}

/// Boundary connectivity, left/right elements, neighbours and the
/// interior/exterior split.
pub fn construct_boundaries(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    out: &mut SolverMesh,
) -> Result<(), MeshAdaptError> {
    let (ed, bd) = (mesh.element_dim(), mesh.boundary_dim());
    let elements = numbering.local(ed)?;
    let vertices = numbering.local(EntityDim::Vertex)?;
    let boundaries = numbering.local(bd)?;
    let per_element = mesh.cell_type().boundaries().len();

    // (element ordinal, local boundary) of every side of each boundary
    let mut sides: Vec<Vec<(usize, usize)>> = vec![Vec::new(); mesh.count(bd)];
    for (eo, &e) in elements.order().iter().enumerate() {
        for (i, &b) in mesh.downward(e, bd).iter().enumerate() {
            sides[b].push((eo, i));
        }
    }

    out.n_element_boundaries_global = boundaries.len();
    out.element_boundary_nodes_array = ordinals_to_index(
        boundaries
            .order()
            .iter()
            .flat_map(|&b| mesh.vertices(bd, b).iter().map(|&v| vertices.ordinal(v))),
    )?;
    out.element_boundary_elements_array = Vec::with_capacity(2 * boundaries.len());
    out.element_boundary_local_element_boundaries_array = Vec::with_capacity(2 * boundaries.len());
    out.element_neighbors_array = vec![-1; elements.len() * per_element];
    out.interior_element_boundaries_array.clear();
    out.exterior_element_boundaries_array.clear();

    for (bo, &b) in boundaries.order().iter().enumerate() {
        let (left, right) = match sides[b].as_slice() {
            [left] => (*left, None),
            [left, right] => (*left, Some(*right)),
            other => {
                return Err(MeshAdaptError::TopologyMismatch(format!(
                    "{bd:?} {b} bounds {} local elements",
                    other.len()
                )));
            }
        };
        out.element_boundary_elements_array.push(to_index(left.0)?);
        out.element_boundary_local_element_boundaries_array.push(to_index(left.1)?);
        match right {
            Some(right) => {
                out.element_boundary_elements_array.push(to_index(right.0)?);
                out.element_boundary_local_element_boundaries_array.push(to_index(right.1)?);
                out.element_neighbors_array[left.0 * per_element + left.1] = to_index(right.0)?;
                out.element_neighbors_array[right.0 * per_element + right.1] = to_index(left.0)?;
            }
            None => {
                out.element_boundary_elements_array.push(-1);
                out.element_boundary_local_element_boundaries_array.push(-1);
            }
        }
        if mesh.classification(bd, b).is_boundary(mesh.dim()) {
            out.exterior_element_boundaries_array.push(to_index(bo)?);
        } else {
            out.interior_element_boundaries_array.push(to_index(bo)?);
        }
    }
    out.n_exterior_element_boundaries_global = out.exterior_element_boundaries_array.len();
    out.n_interior_element_boundaries_global = out.interior_element_boundaries_array.len();
    Ok(())
}

/// Edge connectivity.
pub fn construct_edges(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    out: &mut SolverMesh,
) -> Result<(), MeshAdaptError> {
    let edges = numbering.local(EntityDim::Edge)?;
    let vertices = numbering.local(EntityDim::Vertex)?;
    out.n_edges_global = edges.len();
    out.edge_nodes_array = ordinals_to_index(
        edges
            .order()
            .iter()
            .flat_map(|&e| mesh.vertices(EntityDim::Edge, e).iter().map(|&v| vertices.ordinal(v))),
    )?;
    Ok(())
}

/// Material arrays from classification.
///
/// Elements carry their model tag; boundaries and nodes classified below the
/// mesh dimension carry `boundary_ids(tag)`, everything else 0.
pub fn construct_material_arrays(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    out: &mut SolverMesh,
    boundary_ids: &BoundaryIds,
) -> Result<(), MeshAdaptError> {
    let mesh_dim = mesh.dim();
    let material = |dim: EntityDim, entity: usize| {
        let class = mesh.classification(dim, entity);
        if class.is_boundary(mesh_dim) {
            boundary_id(boundary_ids, class.tag)
        } else {
            0
        }
    };
    let ed = mesh.element_dim();
    out.element_material_types = numbering
        .local(ed)?
        .order()
        .iter()
        .map(|&e| mesh.classification(ed, e).tag)
        .collect();
    let bd = mesh.boundary_dim();
    out.element_boundary_material_types = numbering
        .local(bd)?
        .order()
        .iter()
        .map(|&b| material(bd, b))
        .collect();
    out.node_material_types = numbering
        .local(EntityDim::Vertex)?
        .order()
        .iter()
        .map(|&v| material(EntityDim::Vertex, v))
        .collect();
    Ok(())
}

/// Re-tag every boundary classified on `(mesh_dim - 1, geometric_tag)` and
/// the nodes on its closure with `boundary_id`. Returns the number of
/// boundaries re-tagged.
pub fn update_material_arrays(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    out: &mut SolverMesh,
    boundary_id: i32,
    geometric_tag: i32,
) -> Result<usize, MeshAdaptError> {
    let bd = mesh.boundary_dim();
    let boundaries = numbering.local(bd)?;
    let vertices = numbering.local(EntityDim::Vertex)?;
    if out.element_boundary_material_types.len() != boundaries.len() {
        return Err(MeshAdaptError::ArrayLengthMismatch {
            array: "element_boundary_material_types",
            expected: boundaries.len(),
            found: out.element_boundary_material_types.len(),
        });
    }
    if out.node_material_types.len() != vertices.len() {
        return Err(MeshAdaptError::ArrayLengthMismatch {
            array: "node_material_types",
            expected: vertices.len(),
            found: out.node_material_types.len(),
        });
    }

    let target = Classification::new(mesh.dim() - 1, geometric_tag);
    let mut updated = 0;
    for (bo, &b) in boundaries.order().iter().enumerate() {
        if mesh.classification(bd, b) != target {
            continue;
        }
        out.element_boundary_material_types[bo] = boundary_id;
        for &v in mesh.vertices(bd, b) {
            out.node_material_types[vertices.ordinal(v)] = boundary_id;
        }
        updated += 1;
    }
    Ok(updated)
}

/// Subdomain → global id arrays and the owned-range offsets.
///
/// With no separate `global` mesh (serial) the offsets land in `local` too.
pub fn construct_global_numbering(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    local: &mut SolverMesh,
    global: Option<&mut SolverMesh>,
) -> Result<(), MeshAdaptError> {
    let (ed, bd) = (mesh.element_dim(), mesh.boundary_dim());
    let to_global = |dim: EntityDim| -> Result<Vec<i32>, MeshAdaptError> {
        let n = numbering.local(dim)?.len();
        (0..n)
            .map(|o| {
                let id = numbering.global_of_ordinal(dim, o)?;
                to_index(id as usize)
            })
            .collect()
    };
    let offsets = |dim: EntityDim| -> Result<Vec<i32>, MeshAdaptError> {
        numbering.offsets(dim)?.iter().map(|&o| to_index(o as usize)).collect()
    };

    local.element_numbering_subdomain2global = to_global(ed)?;
    local.node_numbering_subdomain2global = to_global(EntityDim::Vertex)?;
    local.element_boundary_numbering_subdomain2global = to_global(bd)?;
    local.edge_numbering_subdomain2global = to_global(EntityDim::Edge)?;

    let target = match global {
        Some(global) => {
            global.n_elements_global = numbering.global(ed)?.total() as usize;
            global.n_nodes_global = numbering.global(EntityDim::Vertex)?.total() as usize;
            global.n_element_boundaries_global = numbering.global(bd)?.total() as usize;
            global.n_edges_global = numbering.global(EntityDim::Edge)?.total() as usize;
            global.n_nodes_element = local.n_nodes_element;
            global.n_nodes_element_boundary = local.n_nodes_element_boundary;
            global.n_element_boundaries_element = local.n_element_boundaries_element;
            global
        }
        None => local,
    };
    target.element_offsets_subdomain_owned = offsets(ed)?;
    target.node_offsets_subdomain_owned = offsets(EntityDim::Vertex)?;
    target.element_boundary_offsets_subdomain_owned = offsets(bd)?;
    target.edge_offsets_subdomain_owned = offsets(EntityDim::Edge)?;
    Ok(())
}

/// Node → element star, node → node star, element diameters, `h` and `h_min`.
pub fn construct_global_structures(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    out: &mut SolverMesh,
) -> Result<(), MeshAdaptError> {
    let ed = mesh.element_dim();
    let elements = numbering.local(ed)?;
    let vertices = numbering.local(EntityDim::Vertex)?;
    let n_nodes = vertices.len();

    let mut node_elements: Vec<Vec<usize>> = vec![Vec::new(); n_nodes];
    for (eo, &e) in elements.order().iter().enumerate() {
        for &v in mesh.vertices(ed, e) {
            node_elements[vertices.ordinal(v)].push(eo);
        }
    }
    let mut node_star: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n_nodes];
    for edge in 0..mesh.count(EntityDim::Edge) {
        let v = mesh.vertices(EntityDim::Edge, edge);
        let (a, b) = (vertices.ordinal(v[0]), vertices.ordinal(v[1]));
        node_star[a].insert(b);
        node_star[b].insert(a);
    }

    out.max_n_elements_node = node_elements.iter().map(Vec::len).max().unwrap_or(0);
    (out.node_element_offsets, out.node_elements_array) = csr(node_elements.iter().map(|l| l.iter().copied()))?;
    (out.node_star_offsets, out.node_star_array) = csr(node_star.iter().map(|s| s.iter().copied()))?;

    out.element_diameters_array = elements
        .order()
        .iter()
        .map(|&e| {
            let pts: Vec<[f64; 3]> = mesh.vertices(ed, e).iter().map(|&v| mesh.coords(v)).collect();
            diameter(&pts)
        })
        .collect();
    out.h = out.element_diameters_array.iter().copied().fold(0.0, f64::max);
    out.h_min = out
        .element_diameters_array
        .iter()
        .copied()
        .reduce(f64::min)
        .unwrap_or(0.0);
    Ok(())
}

fn csr<I, R>(rows: I) -> Result<(Vec<i32>, Vec<i32>), MeshAdaptError>
where
    I: Iterator<Item = R>,
    R: Iterator<Item = usize>,
{
    let mut offsets = vec![0];
    let mut values = Vec::new();
    for row in rows {
        for v in row {
            values.push(to_index(v)?);
        }
        offsets.push(to_index(values.len())?);
    }
    Ok((offsets, values))
}

/// Final step: owned counts from the numbering.
pub fn init_solver_mesh(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    out: &mut SolverMesh,
) -> Result<(), MeshAdaptError> {
    out.n_elements_owned = numbering.owned_count(mesh.element_dim())?;
    out.n_nodes_owned = numbering.owned_count(EntityDim::Vertex)?;
    out.n_element_boundaries_owned = numbering.owned_count(mesh.boundary_dim())?;
    out.n_edges_owned = numbering.owned_count(EntityDim::Edge)?;
    Ok(())
}

fn construct_local(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    boundary_ids: &BoundaryIds,
    remaps: &[(i32, i32)],
) -> Result<SolverMesh, MeshAdaptError> {
    let mut out = SolverMesh::default();
    construct_elements(mesh, numbering, &mut out)?;
    construct_nodes(mesh, numbering, &mut out)?;
    construct_boundaries(mesh, numbering, &mut out)?;
    construct_edges(mesh, numbering, &mut out)?;
    construct_material_arrays(mesh, numbering, &mut out, boundary_ids)?;
    for &(id, tag) in remaps {
        update_material_arrays(mesh, numbering, &mut out, id, tag)?;
    }
    Ok(out)
}

/// Rebuild a single-partition solver mesh. `solver` is replaced only on success.
///
/// `remaps` holds `(boundary_id, geometric_tag)` pairs, applied in order.
pub fn rebuild_serial(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    solver: &mut SolverMesh,
    boundary_ids: &BoundaryIds,
    remaps: &[(i32, i32)],
) -> Result<(), MeshAdaptError> {
    let mut out = construct_local(mesh, numbering, boundary_ids, remaps)?;
    construct_global_numbering(mesh, numbering, &mut out, None)?;
    construct_global_structures(mesh, numbering, &mut out)?;
    init_solver_mesh(mesh, numbering, &mut out)?;
    *solver = out;
    Ok(())
}

/// Rebuild this rank's subdomain mesh and the global partition metadata.
/// Collective; both meshes are replaced only on success.
///
/// The global mesh carries counts, owned-range offsets, `h` and `h_min`; its
/// connectivity arrays are left empty.
pub fn rebuild_parallel<C: Communicator>(
    mesh: &DistributedMesh,
    numbering: &NumberingTables,
    global: &mut SolverMesh,
    subdomain: &mut SolverMesh,
    boundary_ids: &BoundaryIds,
    remaps: &[(i32, i32)],
    comm: &C,
) -> Result<(), MeshAdaptError> {
    let mut sub = construct_local(mesh, numbering, boundary_ids, remaps)?;
    let mut glob = SolverMesh::default();
    construct_global_numbering(mesh, numbering, &mut sub, Some(&mut glob))?;
    construct_global_structures(mesh, numbering, &mut sub)?;
    init_solver_mesh(mesh, numbering, &mut sub)?;

    let h = all_gather(comm, tags::ALL_GATHER, [sub.h, sub.h_min])?;
    glob.h = h.iter().map(|v| v[0]).fold(0.0, f64::max);
    glob.h_min = h
        .iter()
        .filter(|v| v[1] > 0.0)
        .map(|v| v[1])
        .reduce(f64::min)
        .unwrap_or(0.0);
    glob.n_elements_owned = glob.n_elements_global;
    glob.n_nodes_owned = glob.n_nodes_global;
    glob.n_element_boundaries_owned = glob.n_element_boundaries_global;
    glob.n_edges_owned = glob.n_edges_global;

    *subdomain = sub;
    *global = glob;
    Ok(())
}
