mod util;

use mesh_adapt_driver::algs::communicator::Communicator;
use mesh_adapt_driver::algs::meshgen::unit_cube;
use mesh_adapt_driver::algs::partition::{slab_parts, split_by_elements};
use mesh_adapt_driver::config::DriverConfig;
use mesh_adapt_driver::solver_mesh::SolverMesh;
use mesh_adapt_driver::topology::cell_type::CellType;
use mesh_adapt_driver::topology::entity::EntityDim;
use std::collections::BTreeMap;
use util::{nodes, parallel_driver, run_ranks, square_parts};

fn key(xyz: [f64; 3]) -> (i64, i64) {
    ((xyz[0] * 1e6).round() as i64, (xyz[1] * 1e6).round() as i64)
}

/// Entity vertices as sorted rounded positions, comparable across ranks.
type PositionKey = Vec<[i64; 3]>;

/// Record the global id of every entity in `conn`; copies must agree.
fn collect_ids(ids: &mut BTreeMap<PositionKey, i32>, sub: &SolverMesh, conn: &[i32], gids: &[i32], width: usize) {
    assert_eq!(conn.len(), width * gids.len());
    for (verts, &gid) in conn.chunks_exact(width).zip(gids) {
        let mut k: PositionKey = verts
            .iter()
            .map(|&n| sub.node(n as usize).map(|x| (x * 1e6).round() as i64))
            .collect();
        k.sort_unstable();
        let seen = *ids.entry(k.clone()).or_insert(gid);
        assert_eq!(seen, gid, "entity at {k:?} numbered twice");
    }
}

/// Ids are exactly `0..total`.
fn assert_dense(ids: &BTreeMap<PositionKey, i32>, total: usize) {
    let mut all: Vec<i32> = ids.values().copied().collect();
    all.sort_unstable();
    assert_eq!(all, (0..total as i32).collect::<Vec<_>>());
}

#[test]
fn owned_ranges_tile_the_global_ids() {
    let (global_in, subs) = square_parts(4, 2, CellType::Quadrilateral, 2);
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let (_driver, global, sub) = parallel_driver(comm, DriverConfig::new(1.0, 0.01, 2), &global_in, &subs);
        (rank, global, sub)
    });

    let offsets = results[0].1.node_offsets_subdomain_owned.clone();
    assert_eq!(offsets.len(), 3);
    assert_eq!(offsets[0], 0);
    assert_eq!(*offsets.last().unwrap(), 15);
    for (rank, global, sub) in &results {
        assert_eq!(global.n_nodes_global, 15);
        assert_eq!(global.n_elements_global, 8);
        assert_eq!(global.node_offsets_subdomain_owned, offsets);
        assert_eq!(global.element_offsets_subdomain_owned.last(), Some(&8));
        let (lo, hi) = (offsets[*rank], offsets[rank + 1]);
        assert_eq!((hi - lo) as usize, sub.n_nodes_owned);
        // owned nodes come first and are numbered consecutively
        let owned = &sub.node_numbering_subdomain2global[..sub.n_nodes_owned];
        assert_eq!(owned.to_vec(), (lo..hi).collect::<Vec<i32>>());
        assert_eq!(sub.n_elements_owned, 4);
    }
}

#[test]
fn shared_vertices_agree_on_their_global_id() {
    let (global_in, subs) = square_parts(4, 4, CellType::Triangle, 2);
    let results = run_ranks(2, |comm| {
        let (_driver, global, sub) = parallel_driver(comm, DriverConfig::new(1.0, 0.01, 2), &global_in, &subs);
        (global, sub)
    });

    let mut ids: BTreeMap<(i64, i64), i32> = BTreeMap::new();
    for (_, sub) in &results {
        for (xyz, &gid) in nodes(sub).into_iter().zip(&sub.node_numbering_subdomain2global) {
            if let Some(&seen) = ids.get(&key(xyz)) {
                assert_eq!(seen, gid, "vertex at {xyz:?} numbered twice");
            } else {
                ids.insert(key(xyz), gid);
            }
        }
    }
    assert_eq!(ids.len(), 25);
    let mut all: Vec<i32> = ids.values().copied().collect();
    all.sort_unstable();
    assert_eq!(all, (0..25).collect::<Vec<i32>>());
    assert_eq!(results[0].0.n_edges_global, 56);
}

#[test]
fn numbering_tables_match_the_rebuilt_arrays() {
    let (global_in, subs) = square_parts(3, 2, CellType::Quadrilateral, 3);
    run_ranks(3, |comm| {
        let (driver, _global, sub) = parallel_driver(comm, DriverConfig::new(1.0, 0.01, 2), &global_in, &subs);
        let numbering = driver.numbering().unwrap();
        let vertices = numbering.global(EntityDim::Vertex).unwrap();
        assert_eq!(vertices.total(), 12);
        let local = numbering.local(EntityDim::Vertex).unwrap();
        for ordinal in 0..local.len() {
            assert_eq!(
                vertices.id(local.entity(ordinal)) as i32,
                sub.node_numbering_subdomain2global[ordinal]
            );
        }
    });
}

#[test]
fn shared_edges_agree_on_three_ranks() {
    let (global_in, subs) = square_parts(6, 4, CellType::Triangle, 3);
    let results = run_ranks(3, |comm| {
        let (_driver, global, sub) = parallel_driver(comm, DriverConfig::new(1.0, 0.01, 2), &global_in, &subs);
        (global, sub)
    });

    let (mut edges, mut sides) = (BTreeMap::new(), BTreeMap::new());
    for (global, sub) in &results {
        assert_eq!(global.n_edges_global, 82);
        collect_ids(&mut edges, sub, &sub.edge_nodes_array, &sub.edge_numbering_subdomain2global, 2);
        collect_ids(
            &mut sides,
            sub,
            &sub.element_boundary_nodes_array,
            &sub.element_boundary_numbering_subdomain2global,
            sub.n_nodes_element_boundary,
        );
    }
    assert_eq!(edges.len(), 82);
    assert_dense(&edges, 82);
    assert_dense(&sides, results[0].0.n_element_boundaries_global);
}

#[test]
fn tetrahedra_agree_on_edges_and_faces() {
    let global_in = unit_cube(2, CellType::Tetrahedron).unwrap();
    let subs = split_by_elements(&global_in, &slab_parts(&global_in, 2, 0), 2).unwrap();
    let results = run_ranks(2, |comm| {
        let (_driver, global, sub) = parallel_driver(comm, DriverConfig::new(1.0, 0.01, 2), &global_in, &subs);
        (global, sub)
    });

    let (mut edges, mut faces) = (BTreeMap::new(), BTreeMap::new());
    for (global, sub) in &results {
        assert_eq!(global.n_edges_global, 98);
        assert_eq!(global.n_element_boundaries_global, 120);
        collect_ids(&mut edges, sub, &sub.edge_nodes_array, &sub.edge_numbering_subdomain2global, 2);
        collect_ids(
            &mut faces,
            sub,
            &sub.element_boundary_nodes_array,
            &sub.element_boundary_numbering_subdomain2global,
            3,
        );
    }
    assert_dense(&edges, 98);
    assert_dense(&faces, 120);
}

#[test]
fn untagged_partition_interfaces_stay_interior() {
    let (global_in, mut subs) = square_parts(4, 2, CellType::Quadrilateral, 2);
    for sub in &mut subs {
        sub.element_boundary_material_types.clear();
        sub.node_material_types.clear();
    }
    let results = run_ranks(2, |comm| {
        let (_driver, _global, sub) = parallel_driver(comm, DriverConfig::new(1.0, 0.01, 2), &global_in, &subs);
        sub
    });
    for sub in &results {
        // three outer sides of a 2 x 2 block; the two interface edges are interior
        assert_eq!(sub.n_element_boundaries_global, 12);
        assert_eq!(sub.n_exterior_element_boundaries_global, 6);
        assert_eq!(sub.n_interior_element_boundaries_global, 6);
    }
}
