mod util;

use mesh_adapt_driver::adapt::{AdaptRequest, AdaptService, EdgeSplitAdapter};
use mesh_adapt_driver::algs::communicator::{Communicator, LocalComm, NoComm, tags};
use mesh_adapt_driver::algs::exchange::all_reduce_count;
use mesh_adapt_driver::algs::meshgen::{unit_cube, unit_square};
use mesh_adapt_driver::config::{AdaptParameters, DriverConfig};
use mesh_adapt_driver::driver::{MeshAdaptDriver, MeshState};
use mesh_adapt_driver::mesh::field::{NodeField, SizeField};
use mesh_adapt_driver::mesh_error::{ErrorKind, MeshAdaptError};
use mesh_adapt_driver::solver_mesh::SolverMesh;
use mesh_adapt_driver::topology::cell_type::CellType;
use mesh_adapt_driver::topology::entity::EntityDim;
use util::{nodes, parallel_driver, run_ranks, square_parts};

fn linear(p: &[f64; 3]) -> f64 {
    p[0] + p[1]
}

#[test]
fn two_rank_refinement_preserves_a_linear_solution() {
    let (global, subs) = square_parts(10, 10, CellType::Quadrilateral, 2);
    let results = run_ranks(2, |comm| {
        let (mut driver, _g, sub) = parallel_driver(comm, DriverConfig::new(1.0, 0.01, 3), &global, &subs);
        let u: Vec<f64> = nodes(&sub).iter().map(linear).collect();
        driver.transfer_solution_to_library(&u, 1, u.len()).unwrap();
        let before = driver.field_integral("solution", 0).unwrap();

        driver.calculate_size_field(&AdaptParameters::edge_length_scale(0.5)).unwrap();
        assert!(matches!(
            driver.adapt_mesh(&EdgeSplitAdapter::default()),
            Err(MeshAdaptError::SizeFieldNotSynchronized)
        ));
        driver.sync_size_field().unwrap();
        let report = driver.adapt_mesh(&EdgeSplitAdapter::default()).unwrap();
        assert_eq!(driver.n_adapt(), 1);
        assert_eq!(driver.state(), MeshState::Adapted);
        let after = driver.field_integral("solution", 0).unwrap();

        let (mut g, mut s) = (SolverMesh::default(), SolverMesh::default());
        driver.rebuild_parallel_mesh(&mut g, &mut s).unwrap();
        let mut back = vec![0.0; s.n_nodes_global];
        driver.transfer_solution_to_solver(&mut back, 1, s.n_nodes_global).unwrap();
        for (p, value) in nodes(&s).iter().zip(&back) {
            approx::assert_relative_eq!(*value, linear(p), epsilon = 1e-12);
        }
        (report, before, after, g)
    });

    for (report, before, after, global) in &results {
        assert_eq!(report.elements_before, 100);
        assert_eq!(report.elements_after, 400);
        assert!(report.converged);
        assert_eq!(report.passes, 1);
        approx::assert_relative_eq!(*before, 1.0, epsilon = 1e-12);
        approx::assert_relative_eq!(*after, *before, epsilon = 1e-9);
        assert_eq!(global.n_elements_global, 400);
        assert_eq!(global.n_nodes_global, 441);
    }
    assert_eq!(results[0].0, results[1].0);
}

#[test]
fn pass_bound_stops_unconverged_refinement() {
    let mut driver = MeshAdaptDriver::new(DriverConfig::new(1.0, 0.01, 1), NoComm).unwrap();
    driver
        .construct_from_serial_mesh(&unit_square(2, 2, CellType::Triangle).unwrap())
        .unwrap();
    driver.calculate_size_field(&AdaptParameters::edge_length_scale(0.1)).unwrap();
    let report = driver.adapt_mesh(&EdgeSplitAdapter::default()).unwrap();
    assert_eq!(report.passes, 1);
    assert!(!report.converged);
    assert_eq!(report.elements_after, 32);

    let mut solver = SolverMesh::default();
    driver.rebuild_serial_mesh(&mut solver).unwrap();
    assert_eq!(solver.n_elements_global, 32);
    assert_eq!(solver.n_nodes_global, 25);
}

#[test]
fn repeated_cycles_count_adaptations() {
    let mut driver = MeshAdaptDriver::new(DriverConfig::new(1.0, 0.05, 1), NoComm).unwrap();
    let mut solver = unit_square(2, 2, CellType::Quadrilateral).unwrap();
    driver.construct_from_serial_mesh(&solver).unwrap();
    for cycle in 1..=2 {
        driver.calculate_size_field(&AdaptParameters::edge_length_scale(0.5)).unwrap();
        driver.adapt_mesh(&EdgeSplitAdapter::default()).unwrap();
        assert!(matches!(
            driver.adapt_mesh(&EdgeSplitAdapter::default()),
            Err(MeshAdaptError::InvalidState { state: MeshState::Adapted, .. })
        ));
        driver.rebuild_serial_mesh(&mut solver).unwrap();
        assert_eq!(driver.n_adapt(), cycle);
    }
    assert_eq!(solver.n_elements_global, 64);
}

#[test]
fn inverted_size_bounds_are_rejected_up_front() {
    let err = MeshAdaptDriver::new(DriverConfig::new(0.01, 0.5, 2), NoComm).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn three_dimensional_meshes_are_not_split() {
    let mut driver = MeshAdaptDriver::new(DriverConfig::new(1.0, 0.01, 2), NoComm).unwrap();
    driver
        .construct_from_serial_mesh(&unit_cube(1, CellType::Tetrahedron).unwrap())
        .unwrap();
    driver.calculate_size_field(&AdaptParameters::edge_length_scale(0.5)).unwrap();
    let err = driver.adapt_mesh(&EdgeSplitAdapter::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Adaptation);
    assert_eq!(driver.state(), MeshState::Stable);
    assert_eq!(driver.n_adapt(), 0);
}

#[test]
fn serial_construction_needs_a_single_rank() {
    let mesh = unit_square(1, 1, CellType::Quadrilateral).unwrap();
    let errors = run_ranks(2, |comm: LocalComm| {
        let mut driver = MeshAdaptDriver::new(DriverConfig::new(1.0, 0.01, 2), comm).unwrap();
        driver.construct_from_serial_mesh(&mesh).unwrap_err()
    });
    assert!(errors.iter().all(|e| matches!(e, MeshAdaptError::Config(_))));
}

#[test]
fn a_bad_size_field_on_one_rank_fails_every_rank() {
    let (global, subs) = square_parts(4, 2, CellType::Triangle, 2);
    let errors = run_ranks(2, |comm| {
        let rank = comm.rank();
        let (driver, _g, _s) = parallel_driver(comm, DriverConfig::new(1.0, 0.01, 2), &global, &subs);
        let mesh = driver.mesh().unwrap();
        let n = mesh.count(EntityDim::Vertex);
        // rank 1 hands over one node too few
        let n = if rank == 1 { n - 1 } else { n };
        let size = SizeField::Isotropic(NodeField::from_values("size", 1, vec![0.1; n]).unwrap());
        let err = EdgeSplitAdapter::default()
            .adapt(mesh, &size, &AdaptRequest { max_iterations: 2 }, driver.comm())
            .unwrap_err();
        // both ranks left the call together, so the next exchange pairs up
        assert_eq!(all_reduce_count(driver.comm(), tags::ALL_GATHER, 1).unwrap(), 2);
        err
    });
    assert!(matches!(errors[0], MeshAdaptError::DistributedConsistency(_)));
    assert!(matches!(errors[1], MeshAdaptError::ShapeMismatch { what: "size field nodes", .. }));
}
