//! Entity dimensions and geometric classification.

use serde::{Deserialize, Serialize};

/// Topological dimension of a mesh entity.
///
/// The *element* dimension is the mesh's own dimension: [`EntityDim::Face`] for
/// 2D meshes, [`EntityDim::Region`] for 3D meshes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum EntityDim {
    Vertex,
    Edge,
    Face,
    Region,
}

impl EntityDim {
    /// All dimensions, lowest first.
    pub const ALL: [EntityDim; 4] = [
        EntityDim::Vertex,
        EntityDim::Edge,
        EntityDim::Face,
        EntityDim::Region,
    ];

    pub fn from_dim(dim: usize) -> Option<Self> {
        Self::ALL.get(dim).copied()
    }

    pub fn dim(self) -> usize {
        match self {
            EntityDim::Vertex => 0,
            EntityDim::Edge => 1,
            EntityDim::Face => 2,
            EntityDim::Region => 3,
        }
    }

    /// Dimensions present in a mesh of topological dimension `mesh_dim`.
    pub fn up_to(mesh_dim: usize) -> impl Iterator<Item = EntityDim> {
        Self::ALL.into_iter().take(mesh_dim + 1)
    }
}

/// Geometric model entity `(dim, tag)` a mesh entity is classified on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Classification {
    pub dim: u8,
    pub tag: i32,
}

impl Classification {
    pub fn new(dim: usize, tag: i32) -> Self {
        Self { dim: dim as u8, tag }
    }

    /// True when the model entity lies below the mesh dimension (a boundary).
    pub fn is_boundary(self, mesh_dim: usize) -> bool {
        (self.dim as usize) < mesh_dim
    }

    /// Lowest-dimensional classification wins; ties go to the smaller tag.
    pub fn lower(a: Option<Self>, b: Self) -> Self {
        match a {
            Some(a) if (a.dim, a.tag) <= (b.dim, b.tag) => a,
            _ => b,
        }
    }
}
