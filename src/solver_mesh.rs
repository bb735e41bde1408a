//! The solver's flat-array mesh.
//!
//! Index arrays are `i32` with `-1` for "none"; coordinates carry three
//! components per node whatever the mesh dimension. The caller owns the
//! structure: import reads the input arrays, the rebuild overwrites all of it.
//!
//! Input arrays read by import:
//! `n_nodes_global`, `n_elements_global`, `n_nodes_element`,
//! `n_nodes_element_boundary`, `node_array`, `element_nodes_array`,
//! `element_material_types`, and optionally `node_material_types`,
//! `element_boundary_nodes_array` (with `n_element_boundaries_global`),
//! `element_boundary_material_types` and, for subdomains,
//! `node_numbering_subdomain2global`.

use crate::mesh_error::MeshAdaptError;
use crate::topology::cell_type::CellType;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverMesh {
    pub n_elements_global: usize,
    pub n_nodes_global: usize,
    pub n_nodes_element: usize,
    pub n_nodes_element_boundary: usize,
    pub n_element_boundaries_element: usize,
    pub n_element_boundaries_global: usize,
    pub n_interior_element_boundaries_global: usize,
    pub n_exterior_element_boundaries_global: usize,
    pub n_edges_global: usize,
    pub max_n_elements_node: usize,

    pub n_elements_owned: usize,
    pub n_nodes_owned: usize,
    pub n_element_boundaries_owned: usize,
    pub n_edges_owned: usize,

    pub node_array: Vec<f64>,
    pub element_nodes_array: Vec<i32>,
    pub element_material_types: Vec<i32>,
    pub node_material_types: Vec<i32>,
    pub element_boundary_nodes_array: Vec<i32>,
    pub element_boundary_material_types: Vec<i32>,
    pub element_boundaries_array: Vec<i32>,
    /// `[left, right]` element per boundary, `right = -1` on a single-sided boundary.
    pub element_boundary_elements_array: Vec<i32>,
    pub element_boundary_local_element_boundaries_array: Vec<i32>,
    pub element_neighbors_array: Vec<i32>,
    pub interior_element_boundaries_array: Vec<i32>,
    pub exterior_element_boundaries_array: Vec<i32>,
    pub edge_nodes_array: Vec<i32>,

    pub node_element_offsets: Vec<i32>,
    pub node_elements_array: Vec<i32>,
    pub node_star_offsets: Vec<i32>,
    pub node_star_array: Vec<i32>,
    pub element_diameters_array: Vec<f64>,
    pub h: f64,
    pub h_min: f64,

    pub element_offsets_subdomain_owned: Vec<i32>,
    pub node_offsets_subdomain_owned: Vec<i32>,
    pub element_boundary_offsets_subdomain_owned: Vec<i32>,
    pub edge_offsets_subdomain_owned: Vec<i32>,
    pub element_numbering_subdomain2global: Vec<i32>,
    pub node_numbering_subdomain2global: Vec<i32>,
    pub element_boundary_numbering_subdomain2global: Vec<i32>,
    pub edge_numbering_subdomain2global: Vec<i32>,
}

impl SolverMesh {
    /// Cell type implied by the per-element node counts.
    pub fn cell_type(&self) -> Result<CellType, MeshAdaptError> {
        CellType::from_solver_counts(self.n_nodes_element, self.n_nodes_element_boundary).ok_or(
            MeshAdaptError::UnsupportedCell {
                nodes_per_element: self.n_nodes_element,
                nodes_per_boundary: self.n_nodes_element_boundary,
            },
        )
    }

    /// Number of boundaries listed in `element_boundary_nodes_array`.
    pub fn listed_boundaries(&self) -> usize {
        self.element_boundary_nodes_array
            .len()
            .checked_div(self.n_nodes_element_boundary)
            .unwrap_or(0)
    }

    /// Check the input arrays against the declared counts.
    pub fn check_input(&self) -> Result<CellType, MeshAdaptError> {
        let cell = self.cell_type()?;
        expect_len("node_array", self.node_array.len(), 3 * self.n_nodes_global)?;
        expect_len(
            "element_nodes_array",
            self.element_nodes_array.len(),
            self.n_elements_global * self.n_nodes_element,
        )?;
        expect_len(
            "element_material_types",
            self.element_material_types.len(),
            self.n_elements_global,
        )?;
        expect_optional_len(
            "node_material_types",
            self.node_material_types.len(),
            self.n_nodes_global,
        )?;
        if !self.element_boundary_nodes_array.is_empty() {
            expect_len(
                "element_boundary_nodes_array",
                self.element_boundary_nodes_array.len(),
                self.n_element_boundaries_global * self.n_nodes_element_boundary,
            )?;
        }
        expect_optional_len(
            "element_boundary_material_types",
            self.element_boundary_material_types.len(),
            self.listed_boundaries(),
        )?;
        expect_optional_len(
            "node_numbering_subdomain2global",
            self.node_numbering_subdomain2global.len(),
            self.n_nodes_global,
        )?;
        let bad_node = self
            .element_nodes_array
            .iter()
            .chain(&self.element_boundary_nodes_array)
            .find(|&&n| n < 0 || n as usize >= self.n_nodes_global);
        if let Some(n) = bad_node {
            return Err(MeshAdaptError::TopologyMismatch(format!(
                "node index {n} is outside 0..{}",
                self.n_nodes_global
            )));
        }
        Ok(cell)
    }

    pub fn node(&self, node: usize) -> [f64; 3] {
        [
            self.node_array[3 * node],
            self.node_array[3 * node + 1],
            self.node_array[3 * node + 2],
        ]
    }

    pub fn element_nodes(&self, element: usize) -> &[i32] {
        let n = self.n_nodes_element;
        &self.element_nodes_array[element * n..(element + 1) * n]
    }

    pub fn boundary_nodes(&self, boundary: usize) -> &[i32] {
        let n = self.n_nodes_element_boundary;
        &self.element_boundary_nodes_array[boundary * n..(boundary + 1) * n]
    }
}

fn expect_len(array: &'static str, found: usize, expected: usize) -> Result<(), MeshAdaptError> {
    if found == expected {
        Ok(())
    } else {
        Err(MeshAdaptError::ArrayLengthMismatch {
            array,
            expected,
            found,
        })
    }
}

/// Optional arrays may be absent (empty) or exactly sized.
fn expect_optional_len(array: &'static str, found: usize, expected: usize) -> Result<(), MeshAdaptError> {
    if found == 0 {
        Ok(())
    } else {
        expect_len(array, found, expected)
    }
}
