//! The distributed mesh handle: one rank's part of an unstructured mesh.
//!
//! A [`DistributedMesh`] stores vertex coordinates, a vertex table per entity
//! dimension above zero, the downward adjacency of every element, the geometric
//! classification of every entity, the [`Overlap`] links to copies on other
//! ranks, and the node fields attached to the vertices.
//!
//! Vertex lists of non-element entities are looked up by their sorted vertex
//! key, so any two ranks (or any two elements) that name the same vertices
//! reach the same entity.

use crate::mesh::field::NodeField;
use crate::mesh::model::{GeometricModel, check_classification};
use crate::mesh_error::MeshAdaptError;
use crate::overlap::overlap::Overlap;
use crate::topology::cell_type::CellType;
use crate::topology::entity::{Classification, EntityDim};
use crate::topology::ownership::EntityOwnership;
use std::collections::{BTreeMap, HashMap};

/// Entities of one dimension, as fixed-width vertex lists.
#[derive(Clone, Debug, Default)]
pub struct EntityTable {
    width: usize,
    verts: Vec<usize>,
    lookup: HashMap<Vec<usize>, usize>,
}

impl EntityTable {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            verts: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.verts.len() / self.width
        }
    }

    pub fn is_empty(&self) -> bool {
        self.verts.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn vertices(&self, entity: usize) -> &[usize] {
        &self.verts[entity * self.width..(entity + 1) * self.width]
    }

    /// Entity with exactly these vertices, in any order.
    pub fn find(&self, verts: &[usize]) -> Option<usize> {
        self.lookup.get(&sorted_key(verts)).copied()
    }

    /// Insert `verts` unless an entity with the same vertices exists.
    ///
    /// Returns the index and whether the entity is new.
    pub fn insert(&mut self, verts: &[usize]) -> (usize, bool) {
        let key = sorted_key(verts);
        if let Some(&idx) = self.lookup.get(&key) {
            return (idx, false);
        }
        let idx = self.len();
        self.verts.extend_from_slice(verts);
        self.lookup.insert(key, idx);
        (idx, true)
    }

    /// Append without deduplication (elements are never looked up twice).
    pub fn push(&mut self, verts: &[usize]) -> usize {
        let idx = self.len();
        self.verts.extend_from_slice(verts);
        self.lookup.entry(sorted_key(verts)).or_insert(idx);
        idx
    }
}

pub(crate) fn sorted_key(verts: &[usize]) -> Vec<usize> {
    let mut key = verts.to_vec();
    key.sort_unstable();
    key
}

/// One rank's part of the distributed mesh.
#[derive(Clone, Debug)]
pub struct DistributedMesh {
    pub(crate) cell_type: CellType,
    pub(crate) rank: usize,
    pub(crate) size: usize,
    pub(crate) coords: Vec<[f64; 3]>,
    /// Vertex lists for dimensions `1..=dim`.
    pub(crate) tables: BTreeMap<EntityDim, EntityTable>,
    /// Element → entities of each dimension `1..dim`, in template order.
    pub(crate) downward: BTreeMap<EntityDim, Vec<usize>>,
    pub(crate) classification: BTreeMap<EntityDim, Vec<Classification>>,
    pub(crate) overlap: Overlap,
    pub(crate) ownership: BTreeMap<EntityDim, EntityOwnership>,
    pub(crate) fields: BTreeMap<String, NodeField>,
}

impl DistributedMesh {
    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// Topological dimension of the mesh.
    pub fn dim(&self) -> usize {
        self.cell_type.dimension()
    }

    /// Dimension of the elements.
    pub fn element_dim(&self) -> EntityDim {
        EntityDim::ALL[self.dim()]
    }

    /// Dimension of the element boundaries.
    pub fn boundary_dim(&self) -> EntityDim {
        EntityDim::ALL[self.dim() - 1]
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Dimensions present in the mesh, lowest first.
    pub fn dims(&self) -> impl Iterator<Item = EntityDim> {
        EntityDim::up_to(self.dim())
    }

    /// Number of local entities (owned and ghost) of `dim`.
    pub fn count(&self, dim: EntityDim) -> usize {
        match dim {
            EntityDim::Vertex => self.coords.len(),
            _ => self.tables.get(&dim).map_or(0, EntityTable::len),
        }
    }

    pub fn table(&self, dim: EntityDim) -> Result<&EntityTable, MeshAdaptError> {
        self.tables.get(&dim).ok_or(MeshAdaptError::MissingDimension(dim))
    }

    /// Vertices of a non-vertex entity.
    pub fn vertices(&self, dim: EntityDim, entity: usize) -> &[usize] {
        self.tables
            .get(&dim)
            .map_or(&[][..], |t| t.vertices(entity))
    }

    pub fn coords(&self, vertex: usize) -> [f64; 3] {
        self.coords[vertex]
    }

    pub fn coordinates(&self) -> &[[f64; 3]] {
        &self.coords
    }

    /// Entity of `dim` with exactly these vertices.
    pub fn find(&self, dim: EntityDim, verts: &[usize]) -> Option<usize> {
        self.tables.get(&dim).and_then(|t| t.find(verts))
    }

    /// Entities of `dim` bounding `element`, in template order.
    pub fn downward(&self, element: usize, dim: EntityDim) -> &[usize] {
        let width = template(self.cell_type, dim).len();
        self.downward
            .get(&dim)
            .map_or(&[][..], |d| &d[element * width..(element + 1) * width])
    }

    /// Edges of `element` in [`CellType::edges`] order.
    pub fn element_edges(&self, element: usize) -> Vec<usize> {
        let verts = self.vertices(self.element_dim(), element);
        self.cell_type
            .edges()
            .iter()
            .filter_map(|[a, b]| self.find(EntityDim::Edge, &[verts[*a], verts[*b]]))
            .collect()
    }

    pub fn classification(&self, dim: EntityDim, entity: usize) -> Classification {
        self.classification[&dim][entity]
    }

    pub fn set_classification(&mut self, dim: EntityDim, entity: usize, class: Classification) {
        if let Some(classes) = self.classification.get_mut(&dim) {
            classes[entity] = class;
        }
    }

    pub fn overlap(&self) -> &Overlap {
        &self.overlap
    }

    pub(crate) fn overlap_mut(&mut self) -> &mut Overlap {
        &mut self.overlap
    }

    pub fn ownership(&self, dim: EntityDim) -> Result<&EntityOwnership, MeshAdaptError> {
        self.ownership.get(&dim).ok_or(MeshAdaptError::MissingDimension(dim))
    }

    pub fn is_owned(&self, dim: EntityDim, entity: usize) -> bool {
        self.ownership
            .get(&dim)
            .is_none_or(|o| !o.is_ghost(entity))
    }

    /// Recompute ownership of every dimension from the overlap links.
    pub fn refresh_ownership(&mut self) {
        let rank = self.rank;
        self.ownership = self
            .dims()
            .map(|dim| {
                (
                    dim,
                    EntityOwnership::from_overlap(&self.overlap, dim, self.count(dim), rank),
                )
            })
            .collect();
    }

    /// Put untagged exterior boundaries on the model boundary `(dim - 1, 0)`.
    ///
    /// An element boundary is exterior when it bounds exactly one local
    /// element and has no copy on another rank, so call this after the overlap
    /// is complete. Its closure entities that are still interior follow it;
    /// classifications already on the boundary are kept. Returns the number of
    /// boundaries reclassified.
    pub fn classify_open_boundaries(&mut self) -> usize {
        let (ed, bd) = (self.element_dim(), self.boundary_dim());
        let mesh_dim = self.dim();
        let open = Classification::new(mesh_dim - 1, 0);

        let mut uses = vec![0usize; self.count(bd)];
        for e in 0..self.count(ed) {
            for &b in self.downward(e, bd) {
                uses[b] += 1;
            }
        }
        let exterior: Vec<usize> = (0..uses.len())
            .filter(|&b| uses[b] == 1 && !self.overlap.is_shared(bd, b))
            .filter(|&b| !self.classification(bd, b).is_boundary(mesh_dim))
            .collect();

        let mut closure: Vec<(EntityDim, usize)> = Vec::new();
        for &b in &exterior {
            self.set_classification(bd, b, open);
            let verts = self.vertices(bd, b).to_vec();
            closure.extend(verts.iter().map(|&v| (EntityDim::Vertex, v)));
            if bd == EntityDim::Face {
                closure.extend(
                    (0..verts.len())
                        .filter_map(|i| self.find(EntityDim::Edge, &[verts[i], verts[(i + 1) % verts.len()]]))
                        .map(|edge| (EntityDim::Edge, edge)),
                );
            }
        }
        for (dim, entity) in closure {
            if !self.classification(dim, entity).is_boundary(mesh_dim) {
                self.set_classification(dim, entity, open);
            }
        }
        exterior.len()
    }

    /// Check every classification against the mesh dimension and `model`.
    pub fn validate_classification(&self, model: Option<&GeometricModel>) -> Result<(), MeshAdaptError> {
        for dim in self.dims() {
            for (index, class) in self.classification[&dim].iter().enumerate() {
                check_classification(dim, *class, self.dim(), model).map_err(|reason| {
                    MeshAdaptError::UnclassifiedEntity { dim, index, reason }
                })?;
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Result<&NodeField, MeshAdaptError> {
        self.fields
            .get(name)
            .ok_or_else(|| MeshAdaptError::FieldNotFound(name.to_string()))
    }

    pub fn field_mut(&mut self, name: &str) -> Result<&mut NodeField, MeshAdaptError> {
        self.fields
            .get_mut(name)
            .ok_or_else(|| MeshAdaptError::FieldNotFound(name.to_string()))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &NodeField> {
        self.fields.values()
    }

    /// Attach (or replace) a node field; it must cover every local vertex.
    pub fn attach_field(&mut self, field: NodeField) -> Result<(), MeshAdaptError> {
        if field.num_nodes() != self.coords.len() {
            return Err(MeshAdaptError::ShapeMismatch {
                what: "field node count",
                expected: self.coords.len(),
                found: field.num_nodes(),
            });
        }
        self.fields.insert(field.name().to_string(), field);
        Ok(())
    }

    /// Length of edge `edge`.
    pub fn edge_length(&self, edge: usize) -> f64 {
        let v = self.vertices(EntityDim::Edge, edge);
        crate::mesh::field::norm(sub(self.coords[v[1]], self.coords[v[0]]))
    }
}

/// Local template used to derive entities of `dim` from an element.
pub(crate) fn template(cell: CellType, dim: EntityDim) -> Vec<Vec<usize>> {
    let d = dim.dim();
    if d + 1 == cell.dimension() {
        cell.boundaries().iter().map(|b| b.to_vec()).collect()
    } else if d == 1 {
        cell.edges().iter().map(|e| e.to_vec()).collect()
    } else {
        Vec::new()
    }
}

pub(crate) fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}
