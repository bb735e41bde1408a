//! Split a serial solver mesh into per-rank subdomain meshes.
//!
//! Each subdomain holds the elements assigned to its part, the nodes those
//! elements use (ascending global id) and the listed boundaries that bound one
//! of its elements. `node_numbering_subdomain2global` and
//! `element_numbering_subdomain2global` record where everything came from.

use crate::mesh::distributed::sorted_key;
use crate::mesh_error::{MeshAdaptError, to_index};
use crate::solver_mesh::SolverMesh;
use std::collections::{BTreeSet, HashSet};

/// Assign elements to `n_parts` slabs by the centroid coordinate along `axis`.
pub fn slab_parts(mesh: &SolverMesh, n_parts: usize, axis: usize) -> Vec<usize> {
    let (lo, hi) = (0..mesh.n_nodes_global)
        .map(|n| mesh.node(n)[axis])
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
    let width = (hi - lo).max(f64::MIN_POSITIVE);
    (0..mesh.n_elements_global)
        .map(|e| {
            let nodes = mesh.element_nodes(e);
            let c = nodes.iter().map(|&n| mesh.node(n as usize)[axis]).sum::<f64>() / nodes.len() as f64;
            (((c - lo) / width * n_parts as f64) as usize).min(n_parts - 1)
        })
        .collect()
}

/// Build the subdomain mesh of every part.
pub fn split_by_elements(
    global: &SolverMesh,
    parts: &[usize],
    n_parts: usize,
) -> Result<Vec<SolverMesh>, MeshAdaptError> {
    global.check_input()?;
    if parts.len() != global.n_elements_global {
        return Err(MeshAdaptError::ArrayLengthMismatch {
            array: "element parts",
            expected: global.n_elements_global,
            found: parts.len(),
        });
    }
    if let Some(&p) = parts.iter().find(|&&p| p >= n_parts) {
        return Err(MeshAdaptError::Config(format!("element part {p} is not below {n_parts}")));
    }
    (0..n_parts).map(|part| subdomain(global, parts, part)).collect()
}

fn subdomain(global: &SolverMesh, parts: &[usize], part: usize) -> Result<SolverMesh, MeshAdaptError> {
    let elements: Vec<usize> = (0..global.n_elements_global).filter(|&e| parts[e] == part).collect();
    let nodes: BTreeSet<usize> = elements
        .iter()
        .flat_map(|&e| global.element_nodes(e).iter().map(|&n| n as usize))
        .collect();
    let mut local_of = vec![-1i32; global.n_nodes_global];
    for (local, &n) in nodes.iter().enumerate() {
        local_of[n] = to_index(local)?;
    }

    let cell = global.cell_type()?;
    let faces: HashSet<Vec<usize>> = elements
        .iter()
        .flat_map(|&e| {
            let verts = global.element_nodes(e);
            cell.boundaries()
                .iter()
                .map(move |b| sorted_key(&b.iter().map(|&l| verts[l] as usize).collect::<Vec<_>>()))
        })
        .collect();
    let boundaries: Vec<usize> = (0..global.listed_boundaries())
        .filter(|&b| {
            let verts: Vec<usize> = global.boundary_nodes(b).iter().map(|&n| n as usize).collect();
            faces.contains(&sorted_key(&verts))
        })
        .collect();

    let mut sub = SolverMesh {
        n_elements_global: elements.len(),
        n_nodes_global: nodes.len(),
        n_nodes_element: global.n_nodes_element,
        n_nodes_element_boundary: global.n_nodes_element_boundary,
        n_element_boundaries_element: global.n_element_boundaries_element,
        n_element_boundaries_global: boundaries.len(),
        ..SolverMesh::default()
    };
    for &n in &nodes {
        sub.node_array.extend_from_slice(&global.node(n));
        if let Some(&mat) = global.node_material_types.get(n) {
            sub.node_material_types.push(mat);
        }
        sub.node_numbering_subdomain2global.push(to_index(n)?);
    }
    for &e in &elements {
        sub.element_nodes_array
            .extend(global.element_nodes(e).iter().map(|&n| local_of[n as usize]));
        sub.element_material_types.push(global.element_material_types[e]);
        sub.element_numbering_subdomain2global.push(to_index(e)?);
    }
    for &b in &boundaries {
        sub.element_boundary_nodes_array
            .extend(global.boundary_nodes(b).iter().map(|&n| local_of[n as usize]));
        if let Some(&mat) = global.element_boundary_material_types.get(b) {
            sub.element_boundary_material_types.push(mat);
        }
    }
    Ok(sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::meshgen::unit_square;
    use crate::topology::cell_type::CellType;

    #[test]
    fn two_slabs_share_the_middle_column() {
        let global = unit_square(4, 2, CellType::Quadrilateral).unwrap();
        let parts = slab_parts(&global, 2, 0);
        assert_eq!(parts.iter().filter(|&&p| p == 0).count(), 4);
        let subs = split_by_elements(&global, &parts, 2).unwrap();
        assert_eq!(subs[0].n_nodes_global, 9);
        assert_eq!(subs[1].n_nodes_global, 9);
        // middle column x = 0.5 holds global nodes 2, 7, 12
        let shared: Vec<i32> = subs[0]
            .node_numbering_subdomain2global
            .iter()
            .filter(|g| subs[1].node_numbering_subdomain2global.contains(g))
            .copied()
            .collect();
        assert_eq!(shared, vec![2, 7, 12]);
        assert!(subs.iter().all(|s| s.check_input().is_ok()));
        // each side keeps the interface edges it bounds
        assert_eq!(subs[0].n_element_boundaries_global, 12);
    }
}
