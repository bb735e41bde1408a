mod util;

use mesh_adapt_driver::algs::communicator::{Communicator, NoComm};
use mesh_adapt_driver::algs::meshgen::unit_square;
use mesh_adapt_driver::config::{DriverConfig, FieldLayout};
use mesh_adapt_driver::driver::MeshAdaptDriver;
use mesh_adapt_driver::mesh_error::{ErrorKind, MeshAdaptError};
use mesh_adapt_driver::topology::cell_type::CellType;
use proptest::prelude::*;
use util::{nodes, parallel_driver, run_ranks, square_parts};

fn serial_driver(layout: FieldLayout) -> MeshAdaptDriver<NoComm> {
    let config = DriverConfig::new(1.0, 0.01, 2).with_layout(layout);
    let mut driver = MeshAdaptDriver::new(config, NoComm).unwrap();
    driver
        .construct_from_serial_mesh(&unit_square(3, 3, CellType::Triangle).unwrap())
        .unwrap();
    driver
}

fn buffer_case() -> impl Strategy<Value = (usize, bool, Vec<f64>)> {
    (1usize..4, any::<bool>()).prop_flat_map(|(num_vars, node_major)| {
        (
            Just(num_vars),
            Just(node_major),
            prop::collection::vec(-1.0e6f64..1.0e6, num_vars * 16),
        )
    })
}

proptest! {
    #[test]
    fn solver_buffer_round_trips((num_vars, node_major, buffer) in buffer_case()) {
        let layout = if node_major { FieldLayout::NodeMajor } else { FieldLayout::VariableMajor };
        let mut driver = serial_driver(layout);
        driver.transfer_solution_to_library(&buffer, num_vars, 16).unwrap();
        let mut out = vec![0.0; buffer.len()];
        driver.transfer_solution_to_solver(&mut out, num_vars, 16).unwrap();
        prop_assert_eq!(out, buffer);
    }
}

#[test]
fn wrong_node_count_is_a_shape_error() {
    let mut driver = serial_driver(FieldLayout::VariableMajor);
    let err = driver.transfer_solution_to_library(&[0.0; 15], 1, 15).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
    assert!(matches!(err, MeshAdaptError::ShapeMismatch { what: "num_nodes", expected: 16, found: 15 }));

    let err = driver.transfer_solution_to_library(&[0.0; 20], 1, 16).unwrap_err();
    assert!(matches!(err, MeshAdaptError::ShapeMismatch { what: "buffer length", .. }));
}

#[test]
fn named_fields_are_independent() {
    let mut driver = serial_driver(FieldLayout::NodeMajor);
    let velocity: Vec<f64> = (0..32).map(f64::from).collect();
    driver.transfer_field_to_library("velocity", &velocity, 2, 16).unwrap();
    driver.transfer_field_to_library("phi", &[1.0; 16], 1, 16).unwrap();
    let mut out = vec![0.0; 32];
    driver.transfer_field_to_solver("velocity", &mut out, 2, 16).unwrap();
    assert_eq!(out, velocity);
    assert!(matches!(
        driver.transfer_field_to_solver("pressure", &mut out, 2, 16),
        Err(MeshAdaptError::FieldNotFound(_))
    ));
}

#[test]
fn parallel_transfer_uses_local_ordinals() {
    let (global, subs) = square_parts(4, 2, CellType::Quadrilateral, 2);
    run_ranks(2, |comm| {
        let rank = comm.rank();
        let (mut driver, _g, sub) = parallel_driver(comm, DriverConfig::new(1.0, 0.01, 2), &global, &subs);
        let n = sub.n_nodes_global;
        // u = x + 2y, written in the rebuilt node order
        let u: Vec<f64> = nodes(&sub).iter().map(|p| p[0] + 2.0 * p[1]).collect();
        driver.transfer_solution_to_library(&u, 1, n).unwrap();
        let mesh = driver.mesh().unwrap();
        let field = mesh.field("solution").unwrap();
        for v in 0..n {
            let p = mesh.coords(v);
            approx::assert_relative_eq!(field.node(v)[0], p[0] + 2.0 * p[1]);
        }
        let mut back = vec![0.0; n];
        driver.transfer_solution_to_solver(&mut back, 1, n).unwrap();
        assert_eq!(back, u, "rank {rank}");
    });
}
