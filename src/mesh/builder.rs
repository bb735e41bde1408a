//! Incremental construction of a [`DistributedMesh`].
//!
//! Vertices, elements and explicitly listed boundaries are added first; the
//! remaining edges and faces are derived from the element templates by
//! [`MeshBuilder::finish`], which also resolves the classification of every
//! entity that was not classified explicitly.

use crate::mesh::distributed::{DistributedMesh, EntityTable, template};
use crate::mesh::field::NodeField;
use crate::mesh_error::MeshAdaptError;
use crate::overlap::overlap::Overlap;
use crate::topology::cell_type::CellType;
use crate::topology::entity::{Classification, EntityDim};
use itertools::Itertools;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct MeshBuilder {
    cell_type: CellType,
    rank: usize,
    size: usize,
    coords: Vec<[f64; 3]>,
    elements: EntityTable,
    boundaries: EntityTable,
    explicit: BTreeMap<EntityDim, BTreeMap<usize, Classification>>,
    by_vertices: Vec<(EntityDim, Vec<usize>, Classification)>,
    fields: Vec<NodeField>,
}

impl MeshBuilder {
    /// Start an empty mesh of `cell_type` on `rank` of `size`.
    pub fn new(cell_type: CellType, rank: usize, size: usize) -> Self {
        Self {
            cell_type,
            rank,
            size,
            coords: Vec::new(),
            elements: EntityTable::new(cell_type.vertex_count()),
            boundaries: EntityTable::new(cell_type.boundary_vertex_count()),
            explicit: BTreeMap::new(),
            by_vertices: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn vertex_count(&self) -> usize {
        self.coords.len()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn add_vertex(&mut self, xyz: [f64; 3]) -> usize {
        self.coords.push(xyz);
        self.coords.len() - 1
    }

    /// Add an element classified on `class`.
    pub fn add_element(&mut self, verts: &[usize], class: Classification) -> Result<usize, MeshAdaptError> {
        self.check_vertices("element", verts, self.cell_type.vertex_count())?;
        let idx = self.elements.push(verts);
        self.explicit
            .entry(EntityDim::ALL[self.cell_type.dimension()])
            .or_default()
            .insert(idx, class);
        Ok(idx)
    }

    /// Add an element boundary ahead of derivation; its vertex order is kept.
    ///
    /// `class` of `None` leaves the boundary to inherit the classification of
    /// the elements it bounds.
    pub fn add_boundary(
        &mut self,
        verts: &[usize],
        class: Option<Classification>,
    ) -> Result<usize, MeshAdaptError> {
        self.check_vertices("element boundary", verts, self.cell_type.boundary_vertex_count())?;
        let (idx, fresh) = self.boundaries.insert(verts);
        if !fresh {
            return Err(MeshAdaptError::TopologyMismatch(format!(
                "element boundary {verts:?} is listed twice"
            )));
        }
        if let Some(class) = class {
            self.explicit
                .entry(EntityDim::ALL[self.cell_type.dimension() - 1])
                .or_default()
                .insert(idx, class);
        }
        Ok(idx)
    }

    pub fn classify_vertex(&mut self, vertex: usize, class: Classification) {
        self.explicit
            .entry(EntityDim::Vertex)
            .or_default()
            .insert(vertex, class);
    }

    /// Classify the entity of `dim` spanned by `verts` once it has been derived.
    pub fn classify_entity(&mut self, dim: EntityDim, verts: &[usize], class: Classification) {
        self.by_vertices.push((dim, verts.to_vec(), class));
    }

    pub fn attach_field(&mut self, field: NodeField) {
        self.fields.push(field);
    }

    fn check_vertices(&self, what: &str, verts: &[usize], expected: usize) -> Result<(), MeshAdaptError> {
        if verts.len() != expected {
            return Err(MeshAdaptError::TopologyMismatch(format!(
                "{what} has {} vertices, expected {expected}",
                verts.len()
            )));
        }
        if let Some(&v) = verts.iter().find(|&&v| v >= self.coords.len()) {
            return Err(MeshAdaptError::TopologyMismatch(format!(
                "{what} references vertex {v}, but only {} exist",
                self.coords.len()
            )));
        }
        if !verts.iter().all_unique() {
            return Err(MeshAdaptError::TopologyMismatch(format!(
                "{what} {verts:?} repeats a vertex"
            )));
        }
        Ok(())
    }

    /// Derive edges and faces, resolve classification and produce the mesh.
    pub fn finish(self) -> Result<DistributedMesh, MeshAdaptError> {
        let MeshBuilder {
            cell_type,
            rank,
            size,
            coords,
            elements,
            boundaries,
            mut explicit,
            by_vertices,
            fields,
        } = self;
        let mesh_dim = cell_type.dimension();
        let element_dim = EntityDim::ALL[mesh_dim];
        let n_listed = boundaries.len();

        let mut tables = BTreeMap::new();
        let mut downward = BTreeMap::new();
        for d in 1..mesh_dim {
            let dim = EntityDim::ALL[d];
            let local = template(cell_type, dim);
            let mut table = if d + 1 == mesh_dim {
                boundaries.clone()
            } else {
                EntityTable::new(2)
            };
            let mut adj = Vec::with_capacity(elements.len() * local.len());
            let mut bounded = vec![false; table.len()];
            for e in 0..elements.len() {
                let ev = elements.vertices(e);
                for entry in &local {
                    let verts: Vec<usize> = entry.iter().map(|&i| ev[i]).collect();
                    let (idx, _) = table.insert(&verts);
                    if idx < bounded.len() {
                        bounded[idx] = true;
                    }
                    adj.push(idx);
                }
            }
            if d + 1 == mesh_dim {
                if let Some(orphan) = bounded.iter().take(n_listed).position(|b| !b) {
                    return Err(MeshAdaptError::TopologyMismatch(format!(
                        "listed element boundary {orphan} does not bound any element"
                    )));
                }
            }
            tables.insert(dim, table);
            downward.insert(dim, adj);
        }
        tables.insert(element_dim, elements);

        let mut mesh = DistributedMesh {
            cell_type,
            rank,
            size,
            coords,
            tables,
            downward,
            classification: BTreeMap::new(),
            overlap: Overlap::default(),
            ownership: BTreeMap::new(),
            fields: BTreeMap::new(),
        };

        for (dim, verts, class) in by_vertices {
            let idx = match dim {
                EntityDim::Vertex => verts.first().copied().filter(|&v| v < mesh.coords.len()),
                _ => mesh.find(dim, &verts),
            }
            .ok_or_else(|| {
                MeshAdaptError::TopologyMismatch(format!("no {dim:?} with vertices {verts:?}"))
            })?;
            explicit.entry(dim).or_default().insert(idx, class);
        }

        mesh.classification = resolve_classification(&mesh, &explicit)?;
        mesh.refresh_ownership();
        for field in fields {
            mesh.attach_field(field)?;
        }
        Ok(mesh)
    }
}

/// Explicit classifications win; every other entity takes the lowest
/// classification among the entities one dimension up that contain it.
fn resolve_classification(
    mesh: &DistributedMesh,
    explicit: &BTreeMap<EntityDim, BTreeMap<usize, Classification>>,
) -> Result<BTreeMap<EntityDim, Vec<Classification>>, MeshAdaptError> {
    let mesh_dim = mesh.dim();
    let mut resolved: BTreeMap<EntityDim, Vec<Classification>> = BTreeMap::new();
    let none = BTreeMap::new();

    let element_dim = mesh.element_dim();
    let element_classes = explicit.get(&element_dim).unwrap_or(&none);
    let elements = (0..mesh.count(element_dim))
        .map(|e| {
            element_classes.get(&e).copied().ok_or_else(|| MeshAdaptError::UnclassifiedEntity {
                dim: element_dim,
                index: e,
                reason: "element has no material".into(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    resolved.insert(element_dim, elements);

    for d in (0..mesh_dim).rev() {
        let dim = EntityDim::ALL[d];
        let up = EntityDim::ALL[d + 1];
        let fixed = explicit.get(&dim).unwrap_or(&none);
        let mut classes: Vec<Option<Classification>> =
            (0..mesh.count(dim)).map(|i| fixed.get(&i).copied()).collect();

        for (x, &cx) in resolved[&up].iter().enumerate() {
            for y in sub_entities(mesh, up, x, dim) {
                if !fixed.contains_key(&y) {
                    classes[y] = Some(Classification::lower(classes[y], cx));
                }
            }
        }

        let classes = classes
            .into_iter()
            .enumerate()
            .map(|(index, c)| {
                c.ok_or_else(|| MeshAdaptError::UnclassifiedEntity {
                    dim,
                    index,
                    reason: "not contained in any classified entity".into(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        resolved.insert(dim, classes);
    }
    Ok(resolved)
}

/// Entities of `dim` on the closure of entity `x` of dimension `up = dim + 1`.
fn sub_entities(mesh: &DistributedMesh, up: EntityDim, x: usize, dim: EntityDim) -> Vec<usize> {
    if dim == EntityDim::Vertex {
        return mesh.vertices(up, x).to_vec();
    }
    if up == mesh.element_dim() {
        return mesh.downward(x, dim).to_vec();
    }
    // a face of a 3D mesh: its edges are consecutive vertex pairs
    let verts = mesh.vertices(up, x);
    (0..verts.len())
        .filter_map(|i| mesh.find(dim, &[verts[i], verts[(i + 1) % verts.len()]]))
        .collect()
}
