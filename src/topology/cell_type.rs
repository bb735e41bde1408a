//! Cell type metadata and local entity templates.
//!
//! Local vertex orderings:
//! - [`CellType::Triangle`]: `(0,1,2)` counter-clockwise.
//! - [`CellType::Quadrilateral`]: `(0,1,2,3)` counter-clockwise.
//! - [`CellType::Tetrahedron`]: `(0,1,2,3)`.
//! - [`CellType::Hexahedron`]: `(0..=7)` with `0..=3` the bottom face and
//!   `4..=7` the top face.
//!
//! For simplices local boundary `i` is the boundary opposite local vertex `i`,
//! the convention the solver's `element_boundaries_array` uses.

use serde::{Deserialize, Serialize};

/// Cell types the solver's flat arrays can express.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum CellType {
    /// 2D simplex (triangle).
    Triangle,
    /// 2D tensor-product cell (quad).
    Quadrilateral,
    /// 3D simplex (tet).
    Tetrahedron,
    /// 3D tensor-product cell (hex).
    Hexahedron,
}

const TRI_EDGES: [[usize; 2]; 3] = [[0, 1], [1, 2], [2, 0]];
const QUAD_EDGES: [[usize; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 0]];
const TET_EDGES: [[usize; 2]; 6] = [[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]];
const HEX_EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

const TRI_BOUNDARIES: [&[usize]; 3] = [&[1, 2], &[2, 0], &[0, 1]];
const QUAD_BOUNDARIES: [&[usize]; 4] = [&[0, 1], &[1, 2], &[2, 3], &[3, 0]];
const TET_BOUNDARIES: [&[usize]; 4] = [&[1, 2, 3], &[0, 3, 2], &[0, 1, 3], &[0, 2, 1]];
const HEX_BOUNDARIES: [&[usize]; 6] = [
    &[0, 3, 2, 1],
    &[0, 1, 5, 4],
    &[1, 2, 6, 5],
    &[2, 3, 7, 6],
    &[3, 0, 4, 7],
    &[4, 5, 6, 7],
];

const TRI_SIMPLICES: [&[usize]; 1] = [&[0, 1, 2]];
const QUAD_SIMPLICES: [&[usize]; 2] = [&[0, 1, 2], &[0, 2, 3]];
const TET_SIMPLICES: [&[usize]; 1] = [&[0, 1, 2, 3]];
const HEX_SIMPLICES: [&[usize]; 6] = [
    &[0, 1, 2, 6],
    &[0, 2, 3, 6],
    &[0, 3, 7, 6],
    &[0, 7, 4, 6],
    &[0, 4, 5, 6],
    &[0, 5, 1, 6],
];

impl CellType {
    /// Identify the cell type from the solver's per-element counts.
    pub fn from_solver_counts(nodes_per_element: usize, nodes_per_boundary: usize) -> Option<Self> {
        match (nodes_per_element, nodes_per_boundary) {
            (3, 2) => Some(CellType::Triangle),
            (4, 2) => Some(CellType::Quadrilateral),
            (4, 3) => Some(CellType::Tetrahedron),
            (8, 4) => Some(CellType::Hexahedron),
            _ => None,
        }
    }

    /// Returns the topological dimension of the cell.
    pub fn dimension(self) -> usize {
        match self {
            CellType::Triangle | CellType::Quadrilateral => 2,
            CellType::Tetrahedron | CellType::Hexahedron => 3,
        }
    }

    pub fn vertex_count(self) -> usize {
        match self {
            CellType::Triangle => 3,
            CellType::Quadrilateral | CellType::Tetrahedron => 4,
            CellType::Hexahedron => 8,
        }
    }

    /// Number of vertices on each boundary entity.
    pub fn boundary_vertex_count(self) -> usize {
        match self {
            CellType::Triangle | CellType::Quadrilateral => 2,
            CellType::Tetrahedron => 3,
            CellType::Hexahedron => 4,
        }
    }

    /// Local edges as pairs of local vertex indices.
    pub fn edges(self) -> &'static [[usize; 2]] {
        match self {
            CellType::Triangle => &TRI_EDGES,
            CellType::Quadrilateral => &QUAD_EDGES,
            CellType::Tetrahedron => &TET_EDGES,
            CellType::Hexahedron => &HEX_EDGES,
        }
    }

    /// Local boundaries (codimension-1 entities), outward oriented.
    pub fn boundaries(self) -> &'static [&'static [usize]] {
        match self {
            CellType::Triangle => &TRI_BOUNDARIES,
            CellType::Quadrilateral => &QUAD_BOUNDARIES,
            CellType::Tetrahedron => &TET_BOUNDARIES,
            CellType::Hexahedron => &HEX_BOUNDARIES,
        }
    }

    /// Decomposition into simplices used for linear gradients and integrals.
    pub fn simplices(self) -> &'static [&'static [usize]] {
        match self {
            CellType::Triangle => &TRI_SIMPLICES,
            CellType::Quadrilateral => &QUAD_SIMPLICES,
            CellType::Tetrahedron => &TET_SIMPLICES,
            CellType::Hexahedron => &HEX_SIMPLICES,
        }
    }

    /// Gmsh element type code.
    pub fn gmsh_code(self) -> u32 {
        match self {
            CellType::Triangle => 2,
            CellType::Quadrilateral => 3,
            CellType::Tetrahedron => 4,
            CellType::Hexahedron => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_counts_identify_cells() {
        assert_eq!(CellType::from_solver_counts(3, 2), Some(CellType::Triangle));
        assert_eq!(CellType::from_solver_counts(4, 2), Some(CellType::Quadrilateral));
        assert_eq!(CellType::from_solver_counts(4, 3), Some(CellType::Tetrahedron));
        assert_eq!(CellType::from_solver_counts(8, 4), Some(CellType::Hexahedron));
        assert_eq!(CellType::from_solver_counts(6, 3), None);
    }

    #[test]
    fn simplex_boundaries_are_opposite_their_vertex() {
        for cell in [CellType::Triangle, CellType::Tetrahedron] {
            for (i, boundary) in cell.boundaries().iter().enumerate() {
                assert!(!boundary.contains(&i));
                assert_eq!(boundary.len(), cell.boundary_vertex_count());
            }
        }
    }

    #[test]
    fn every_hex_edge_lies_on_two_faces() {
        for [a, b] in CellType::Hexahedron.edges() {
            let faces = CellType::Hexahedron
                .boundaries()
                .iter()
                .filter(|f| f.contains(a) && f.contains(b))
                .count();
            assert_eq!(faces, 2);
        }
    }
}
