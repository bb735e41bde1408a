//! Solver mesh (or mesh file) → distributed mesh.
//!
//! Classification on import:
//! - element → `(mesh_dim, element material)`;
//! - listed boundary with non-zero material → `(mesh_dim - 1, material)`;
//! - node with non-zero material → `(mesh_dim - 1, material)`;
//! - anything else inherits the lowest classification of its containers;
//! - an untagged boundary bounding one element and no copy on another rank
//!   lies on the model boundary `(mesh_dim - 1, 0)`.
//!
//! Local failures are agreed on before the first exchange and again before
//! returning, so every rank fails together.

use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::{agree, all_reduce_count};
use crate::io::gmsh::GmshMesh;
use crate::mesh::builder::MeshBuilder;
use crate::mesh::distributed::DistributedMesh;
use crate::mesh::model::GeometricModel;
use crate::mesh::sharing::{reduce_classification, resolve_entity_sharing, resolve_vertex_sharing};
use crate::mesh_error::MeshAdaptError;
use crate::solver_mesh::SolverMesh;
use crate::topology::cell_type::CellType;
use crate::topology::entity::{Classification, EntityDim};
use std::collections::HashMap;

/// Populate a builder from the solver's input arrays.
fn builder_from_solver(solver: &SolverMesh, rank: usize, size: usize) -> Result<MeshBuilder, MeshAdaptError> {
    let cell = solver.check_input()?;
    let mesh_dim = cell.dimension();
    let mut builder = MeshBuilder::new(cell, rank, size);

    for n in 0..solver.n_nodes_global {
        let v = builder.add_vertex(solver.node(n));
        match solver.node_material_types.get(n) {
            Some(&mat) if mat != 0 => builder.classify_vertex(v, Classification::new(mesh_dim - 1, mat)),
            _ => {}
        }
    }
    for b in 0..solver.listed_boundaries() {
        let verts: Vec<usize> = solver.boundary_nodes(b).iter().map(|&n| n as usize).collect();
        let class = match solver.element_boundary_material_types.get(b) {
            Some(&mat) if mat != 0 => Some(Classification::new(mesh_dim - 1, mat)),
            _ => None,
        };
        builder.add_boundary(&verts, class)?;
    }
    for e in 0..solver.n_elements_global {
        let verts: Vec<usize> = solver.element_nodes(e).iter().map(|&n| n as usize).collect();
        builder.add_element(&verts, Classification::new(mesh_dim, solver.element_material_types[e]))?;
    }
    Ok(builder)
}

fn check_model_dimension(mesh: &DistributedMesh, model: Option<&GeometricModel>) -> Result<(), MeshAdaptError> {
    match model {
        Some(model) if model.dimension != mesh.dim() => Err(MeshAdaptError::TopologyMismatch(format!(
            "mesh is {}D but the geometric model is {}D",
            mesh.dim(),
            model.dimension
        ))),
        _ => Ok(()),
    }
}

/// Build the mesh of a single-partition solver mesh.
pub fn import_serial(solver: &SolverMesh, model: Option<&GeometricModel>) -> Result<DistributedMesh, MeshAdaptError> {
    let mut mesh = builder_from_solver(solver, 0, 1)?.finish()?;
    mesh.classify_open_boundaries();
    check_model_dimension(&mesh, model)?;
    mesh.validate_classification(model)?;
    log::info!(
        "imported serial {:?} mesh: {} vertices, {} elements",
        mesh.cell_type(),
        mesh.count(EntityDim::Vertex),
        mesh.count(mesh.element_dim())
    );
    Ok(mesh)
}

/// Global vertex keys of a subdomain.
fn vertex_keys(subdomain: &SolverMesh, size: usize) -> Result<Vec<u64>, MeshAdaptError> {
    let gids = &subdomain.node_numbering_subdomain2global;
    if gids.is_empty() && size == 1 {
        return Ok((0..subdomain.n_nodes_global as u64).collect());
    }
    if gids.len() != subdomain.n_nodes_global {
        return Err(MeshAdaptError::ArrayLengthMismatch {
            array: "node_numbering_subdomain2global",
            expected: subdomain.n_nodes_global,
            found: gids.len(),
        });
    }
    Ok(gids.iter().map(|&g| g as u64).collect())
}

/// Build this rank's part from its subdomain mesh and resolve sharing. Collective.
///
/// Vertex copies are matched on `subdomain.node_numbering_subdomain2global`.
/// The home rank of a global node id is the owner range it falls in within
/// `global.node_offsets_subdomain_owned`, or `gid % size` when those offsets
/// are absent.
pub fn import_parallel<C: Communicator>(
    global: &SolverMesh,
    subdomain: &SolverMesh,
    model: Option<&GeometricModel>,
    comm: &C,
) -> Result<DistributedMesh, MeshAdaptError> {
    let (rank, size) = (comm.rank(), comm.size());
    let local = builder_from_solver(subdomain, rank, size)
        .and_then(MeshBuilder::finish)
        .and_then(|mesh| Ok((mesh, vertex_keys(subdomain, size)?)));
    let (mut mesh, keys) = agree(comm, "subdomain import", local)?;

    let offsets: Vec<u64> = global
        .node_offsets_subdomain_owned
        .iter()
        .map(|&o| o as u64)
        .collect();
    let home = |gid: u64| {
        if offsets.len() == size + 1 {
            if let Some(r) = (0..size).find(|&r| offsets[r] <= gid && gid < offsets[r + 1]) {
                return r;
            }
        }
        (gid % size as u64) as usize
    };

    resolve_vertex_sharing(&mut mesh, &keys, home, comm)?;
    resolve_entity_sharing(&mut mesh, comm)?;
    mesh.classify_open_boundaries();
    reduce_classification(&mut mesh, comm)?;
    mesh.refresh_ownership();

    let n_elements = all_reduce_count(comm, tags::ALL_GATHER, mesh.count(mesh.element_dim()))?;
    if global.n_elements_global != 0 && n_elements != global.n_elements_global {
        return Err(MeshAdaptError::DistributedConsistency(format!(
            "subdomains hold {n_elements} elements, the global mesh declares {}",
            global.n_elements_global
        )));
    }
    let checked = check_model_dimension(&mesh, model).and_then(|()| mesh.validate_classification(model));
    agree(comm, "classification check", checked)?;
    log::info!(
        "[rank {rank}] imported subdomain: {} vertices ({} shared), {} elements of {n_elements}",
        mesh.count(EntityDim::Vertex),
        mesh.overlap().shared_count(EntityDim::Vertex),
        mesh.count(mesh.element_dim())
    );
    Ok(mesh)
}

/// Build this rank's part from a parsed `.msh` file. Collective.
///
/// Gmsh node tags are the global vertex keys; the home rank of a tag is
/// `tag % size`.
pub fn import_gmsh<C: Communicator>(
    file: &GmshMesh,
    model: Option<&GeometricModel>,
    comm: &C,
) -> Result<DistributedMesh, MeshAdaptError> {
    let local = gmsh_builder(file, comm.rank(), comm.size())
        .and_then(|(builder, keys)| Ok((builder.finish()?, keys)));
    let (mut mesh, keys) = agree(comm, "mesh file import", local)?;
    if comm.size() > 1 {
        let size = comm.size() as u64;
        resolve_vertex_sharing(&mut mesh, &keys, |k| (k % size) as usize, comm)?;
        resolve_entity_sharing(&mut mesh, comm)?;
    }
    mesh.classify_open_boundaries();
    if comm.size() > 1 {
        reduce_classification(&mut mesh, comm)?;
        mesh.refresh_ownership();
    }
    let checked = check_model_dimension(&mesh, model).and_then(|()| mesh.validate_classification(model));
    agree(comm, "classification check", checked)?;
    log::info!(
        "[rank {}] loaded {:?} mesh: {} vertices, {} elements",
        comm.rank(),
        mesh.cell_type(),
        mesh.count(EntityDim::Vertex),
        mesh.count(mesh.element_dim())
    );
    Ok(mesh)
}

/// Populate a builder from a parsed `.msh` file; also returns the node tags.
fn gmsh_builder(file: &GmshMesh, rank: usize, size: usize) -> Result<(MeshBuilder, Vec<u64>), MeshAdaptError> {
    let mesh_dim = file.elements.iter().map(|e| e.dim()).max().unwrap_or(0);
    let cell = file
        .elements
        .iter()
        .filter(|e| e.dim() == mesh_dim)
        .map(|e| gmsh_cell(e.kind))
        .try_fold(None, |seen: Option<CellType>, cell| match (seen, cell?) {
            (Some(prev), cell) if prev != cell => Err(MeshAdaptError::TopologyMismatch(
                "mixed cell types cannot be expressed in the solver arrays".into(),
            )),
            (_, cell) => Ok(Some(cell)),
        })?
        .ok_or_else(|| MeshAdaptError::MeshIoParse("the mesh file contains no cells".into()))?;

    let mut builder = MeshBuilder::new(cell, rank, size);
    let mut index: HashMap<u64, usize> = HashMap::with_capacity(file.nodes.len());
    let mut keys = Vec::with_capacity(file.nodes.len());
    for &(tag, xyz) in &file.nodes {
        if index.insert(tag, builder.add_vertex(xyz)).is_some() {
            return Err(MeshAdaptError::MeshIoParse(format!("node {tag} is defined twice")));
        }
        keys.push(tag);
    }
    let lookup = |tags: &[u64]| -> Result<Vec<usize>, MeshAdaptError> {
        tags.iter()
            .map(|t| {
                index
                    .get(t)
                    .copied()
                    .ok_or_else(|| MeshAdaptError::TopologyMismatch(format!("element references unknown node {t}")))
            })
            .collect()
    };

    for element in &file.elements {
        let verts = lookup(&element.nodes)?;
        let class = Classification::new(element.dim(), element.physical);
        match element.dim() {
            d if d == mesh_dim => {
                builder.add_element(&verts, class)?;
            }
            d if d + 1 == mesh_dim => {
                builder.add_boundary(&verts, Some(class))?;
            }
            0 => builder.classify_vertex(verts[0], class),
            d => builder.classify_entity(EntityDim::ALL[d], &verts, class),
        }
    }

    Ok((builder, keys))
}

fn gmsh_cell(kind: u32) -> Result<CellType, MeshAdaptError> {
    match kind {
        2 => Ok(CellType::Triangle),
        3 => Ok(CellType::Quadrilateral),
        4 => Ok(CellType::Tetrahedron),
        5 => Ok(CellType::Hexahedron),
        _ => Err(MeshAdaptError::MeshIoParse(format!("element type {kind} cannot be a cell"))),
    }
}
