//! Structured solver meshes of the unit square and the unit cube.
//!
//! Every element boundary is listed. Exterior sides are tagged
//! `1` (y = 0), `2` (x = 1), `3` (y = 1), `4` (x = 0), and in 3D `5` (z = 0),
//! `6` (z = 1); interior boundaries carry material 0. A boundary node takes the
//! smallest tag of the sides it lies on, which is also the classification the
//! importer derives for it. Elements carry material 1.

use crate::mesh::distributed::sorted_key;
use crate::mesh_error::MeshAdaptError;
use crate::solver_mesh::SolverMesh;
use crate::topology::cell_type::CellType;
use std::collections::HashMap;

fn invalid_geometry(message: impl Into<String>) -> MeshAdaptError {
    MeshAdaptError::Config(message.into())
}

/// `nx × ny` cells on `[0,1]²`; quads, or each quad split into two triangles.
pub fn unit_square(nx: usize, ny: usize, cell: CellType) -> Result<SolverMesh, MeshAdaptError> {
    if nx == 0 || ny == 0 {
        return Err(invalid_geometry("unit_square needs at least one cell per direction"));
    }
    let id = |i: usize, j: usize| j * (nx + 1) + i;
    let mut coords = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            coords.push([i as f64 / nx as f64, j as f64 / ny as f64, 0.0]);
        }
    }
    let mut cells = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            let quad = [id(i, j), id(i + 1, j), id(i + 1, j + 1), id(i, j + 1)];
            match cell {
                CellType::Quadrilateral => cells.push(quad.to_vec()),
                CellType::Triangle => {
                    cells.push(vec![quad[0], quad[1], quad[2]]);
                    cells.push(vec![quad[0], quad[2], quad[3]]);
                }
                other => {
                    return Err(invalid_geometry(format!("{other:?} is not a 2D cell")));
                }
            }
        }
    }
    Ok(assemble(cell, &coords, &cells))
}

/// `n × n × n` cells on `[0,1]³`; hexes, or each hex split into six tets.
pub fn unit_cube(n: usize, cell: CellType) -> Result<SolverMesh, MeshAdaptError> {
    if n == 0 {
        return Err(invalid_geometry("unit_cube needs at least one cell per direction"));
    }
    let id = |i: usize, j: usize, k: usize| (k * (n + 1) + j) * (n + 1) + i;
    let mut coords = Vec::with_capacity((n + 1).pow(3));
    for k in 0..=n {
        for j in 0..=n {
            for i in 0..=n {
                coords.push([i as f64 / n as f64, j as f64 / n as f64, k as f64 / n as f64]);
            }
        }
    }
    let mut cells = Vec::new();
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let hex = [
                    id(i, j, k),
                    id(i + 1, j, k),
                    id(i + 1, j + 1, k),
                    id(i, j + 1, k),
                    id(i, j, k + 1),
                    id(i + 1, j, k + 1),
                    id(i + 1, j + 1, k + 1),
                    id(i, j + 1, k + 1),
                ];
                match cell {
                    CellType::Hexahedron => cells.push(hex.to_vec()),
                    CellType::Tetrahedron => {
                        for tet in CellType::Hexahedron.simplices() {
                            cells.push(tet.iter().map(|&l| hex[l]).collect());
                        }
                    }
                    other => {
                        return Err(invalid_geometry(format!("{other:?} is not a 3D cell")));
                    }
                }
            }
        }
    }
    Ok(assemble(cell, &coords, &cells))
}

/// Side tag of a point on the boundary of the unit box, smallest first.
fn side_tags(xyz: [f64; 3], dim: usize) -> Vec<i32> {
    const EPS: f64 = 1e-12;
    let mut tags = Vec::new();
    if xyz[1].abs() < EPS {
        tags.push(1);
    }
    if (xyz[0] - 1.0).abs() < EPS {
        tags.push(2);
    }
    if (xyz[1] - 1.0).abs() < EPS {
        tags.push(3);
    }
    if xyz[0].abs() < EPS {
        tags.push(4);
    }
    if dim == 3 {
        if xyz[2].abs() < EPS {
            tags.push(5);
        }
        if (xyz[2] - 1.0).abs() < EPS {
            tags.push(6);
        }
    }
    tags
}

fn assemble(cell: CellType, coords: &[[f64; 3]], cells: &[Vec<usize>]) -> SolverMesh {
    let dim = cell.dimension();
    let mut boundaries: Vec<Vec<usize>> = Vec::new();
    let mut uses: Vec<usize> = Vec::new();
    let mut lookup: HashMap<Vec<usize>, usize> = HashMap::new();
    for verts in cells {
        for local in cell.boundaries() {
            let b: Vec<usize> = local.iter().map(|&l| verts[l]).collect();
            let idx = *lookup.entry(sorted_key(&b)).or_insert_with(|| {
                boundaries.push(b);
                uses.push(0);
                boundaries.len() - 1
            });
            uses[idx] += 1;
        }
    }

    let mut node_material = vec![0i32; coords.len()];
    let mut boundary_material = vec![0i32; boundaries.len()];
    for (b, verts) in boundaries.iter().enumerate() {
        if uses[b] != 1 {
            continue;
        }
        // the side shared by all vertices of the face
        let tag = side_tags(coords[verts[0]], dim)
            .into_iter()
            .find(|t| verts.iter().all(|&v| side_tags(coords[v], dim).contains(t)))
            .unwrap_or(0);
        boundary_material[b] = tag;
        for &v in verts {
            if tag != 0 && (node_material[v] == 0 || tag < node_material[v]) {
                node_material[v] = tag;
            }
        }
    }

    SolverMesh {
        n_elements_global: cells.len(),
        n_nodes_global: coords.len(),
        n_nodes_element: cell.vertex_count(),
        n_nodes_element_boundary: cell.boundary_vertex_count(),
        n_element_boundaries_element: cell.boundaries().len(),
        n_element_boundaries_global: boundaries.len(),
        node_array: coords.iter().flatten().copied().collect(),
        element_nodes_array: cells.iter().flatten().map(|&v| v as i32).collect(),
        element_material_types: vec![1; cells.len()],
        node_material_types: node_material,
        element_boundary_nodes_array: boundaries.iter().flatten().map(|&v| v as i32).collect(),
        element_boundary_material_types: boundary_material,
        ..SolverMesh::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_square_counts_and_tags() {
        let m = unit_square(3, 2, CellType::Quadrilateral).unwrap();
        assert_eq!(m.n_nodes_global, 12);
        assert_eq!(m.n_elements_global, 6);
        assert_eq!(m.n_element_boundaries_global, 17);
        let exterior = m.element_boundary_material_types.iter().filter(|&&t| t != 0).count();
        assert_eq!(exterior, 10);
        // corners take the smaller side tag
        assert_eq!(m.node_material_types[0], 1);
        assert_eq!(m.node_material_types[11], 2);
        assert!(m.check_input().is_ok());
    }

    #[test]
    fn unit_cube_tets_are_conforming() {
        let m = unit_cube(2, CellType::Tetrahedron).unwrap();
        assert_eq!(m.n_elements_global, 48);
        // 8 exterior triangles per side, every interior face shared by two tets
        let exterior = m.element_boundary_material_types.iter().filter(|&&t| t != 0).count();
        assert_eq!(exterior, 6 * 8);
        assert_eq!(m.n_element_boundaries_global, (4 * 48 + 6 * 8) / 2);
        assert!(m.check_input().is_ok());
        assert!(unit_square(0, 1, CellType::Triangle).is_err());
        assert!(unit_cube(1, CellType::Triangle).is_err());
    }
}
