mod util;

use mesh_adapt_driver::algs::communicator::{Communicator, NoComm};
use mesh_adapt_driver::algs::meshgen::unit_square;
use mesh_adapt_driver::config::{AdaptParameters, AnisotropyBounds, DriverConfig, SizeMetric};
use mesh_adapt_driver::driver::MeshAdaptDriver;
use mesh_adapt_driver::mesh::field::SizeField;
use mesh_adapt_driver::mesh_error::MeshAdaptError;
use mesh_adapt_driver::topology::cell_type::CellType;
use mesh_adapt_driver::topology::entity::EntityDim;
use proptest::prelude::*;
use std::collections::BTreeMap;
use util::{nodes, parallel_driver, run_ranks, square_parts};

fn serial_driver(config: DriverConfig, solution: impl Fn([f64; 3]) -> f64) -> MeshAdaptDriver<NoComm> {
    let mesh = unit_square(4, 4, CellType::Triangle).unwrap();
    let mut driver = MeshAdaptDriver::new(config, NoComm).unwrap();
    driver.construct_from_serial_mesh(&mesh).unwrap();
    let u: Vec<f64> = nodes(&mesh).into_iter().map(solution).collect();
    driver.transfer_solution_to_library(&u, 1, u.len()).unwrap();
    driver
}

fn isotropic(size: &SizeField) -> &[f64] {
    match size {
        SizeField::Isotropic(h) => h.values(),
        SizeField::Anisotropic { .. } => panic!("expected an isotropic size field"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn sizes_stay_within_bounds(
        hmin in 0.001f64..0.1,
        stretch in 1.0f64..100.0,
        factor in 0.01f64..10.0,
        target_error in 1e-4f64..1.0,
        slope in -5.0f64..5.0,
    ) {
        let config = DriverConfig::new(hmin * stretch, hmin, 2);
        let mut driver = serial_driver(config, |p| slope * p[0] + p[1] * p[1]);
        let metrics = [
            SizeMetric::EdgeLengthScale { factor },
            SizeMetric::GradientError { component: 0, target_error },
            SizeMetric::InterfaceBand { component: 0, band_width: 0.25 },
        ];
        for metric in metrics {
            let params = AdaptParameters { metric, smoothing_iterations: 2, ..AdaptParameters::default() };
            driver.calculate_size_field(&params).unwrap();
            for &h in isotropic(driver.size_field().unwrap()) {
                prop_assert!(h >= config.hmin && h <= config.hmax, "{h} outside [{}, {}]", config.hmin, config.hmax);
            }
        }
    }
}

#[test]
fn interface_band_refines_near_the_zero_level_set() {
    let config = DriverConfig::new(0.5, 0.05, 2);
    let mut driver = serial_driver(config, |p| p[0] - 0.5);
    let params = AdaptParameters {
        metric: SizeMetric::InterfaceBand {
            component: 0,
            band_width: 0.1,
        },
        ..AdaptParameters::default()
    };
    driver.calculate_size_field(&params).unwrap();
    let mesh = driver.mesh().unwrap();
    let h = isotropic(driver.size_field().unwrap());
    for (v, &size) in h.iter().enumerate() {
        let x = mesh.coords(v)[0];
        let expected = if (x - 0.5).abs() <= 0.1 { 0.05 } else { 0.5 };
        approx::assert_relative_eq!(size, expected);
    }
}

#[test]
fn anisotropic_sizes_respect_the_ratio_bound() {
    let config = DriverConfig::new(1.0, 0.001, 2);
    let mut driver = serial_driver(config, |p| 10.0 * p[0] * p[0] + 0.1 * p[1] * p[1]);
    let params = AdaptParameters {
        anisotropy: AnisotropyBounds {
            max_ratio: 4.0,
            target_error: 0.01,
        },
        ..AdaptParameters::default()
    };
    driver.calculate_aniso_size_field("solution", &params).unwrap();
    let Some(SizeField::Anisotropic { scales, frames }) = driver.size_field() else {
        panic!("expected an anisotropic size field");
    };
    assert_eq!(scales.components(), 2);
    assert_eq!(frames.components(), 4);
    for v in 0..scales.num_nodes() {
        let s = scales.node(v);
        let (lo, hi) = (s[0].min(s[1]), s[0].max(s[1]));
        assert!(lo >= config.hmin && hi <= config.hmax);
        assert!(hi / lo <= 4.0 + 1e-9);
        // rows of the frame are unit vectors
        let f = frames.node(v);
        approx::assert_relative_eq!(f[0] * f[0] + f[1] * f[1], 1.0, epsilon = 1e-9);
    }
}

#[test]
fn missing_field_and_bad_parameters() {
    let mut driver = serial_driver(DriverConfig::new(1.0, 0.01, 2), |p| p[0]);
    assert!(matches!(
        driver.calculate_aniso_size_field("temperature", &AdaptParameters::default()),
        Err(MeshAdaptError::FieldNotFound(_))
    ));
    assert!(matches!(
        driver.calculate_size_field(&AdaptParameters::edge_length_scale(-1.0)),
        Err(MeshAdaptError::Config(_))
    ));
    assert!(matches!(driver.smooth_field(2, 0.5), Err(MeshAdaptError::MissingSizeField)));
    assert!(matches!(driver.smooth_field(2, 1.5), Err(MeshAdaptError::Config(_))));
}

#[test]
fn synchronised_sizes_agree_across_ranks() {
    let (global, subs) = square_parts(6, 3, CellType::Triangle, 2);
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let (mut driver, _g, sub) = parallel_driver(comm, DriverConfig::new(1.0, 0.001, 2), &global, &subs);
        // each rank scales its own copy differently before synchronising
        let u: Vec<f64> = nodes(&sub).iter().map(|p| p[0] * (1.0 + rank as f64)).collect();
        driver.transfer_solution_to_library(&u, 1, u.len()).unwrap();
        let params = AdaptParameters {
            metric: SizeMetric::GradientError {
                component: 0,
                target_error: 0.1,
            },
            ..AdaptParameters::default()
        };
        driver.calculate_size_field(&params).unwrap();
        driver.sync_size_field().unwrap();
        let mesh = driver.mesh().unwrap();
        let h = isotropic(driver.size_field().unwrap()).to_vec();
        (0..h.len())
            .map(|v| {
                let p = mesh.coords(v);
                (((p[0] * 1e6).round() as i64, (p[1] * 1e6).round() as i64), h[v])
            })
            .collect::<Vec<_>>()
    });

    let mut seen: BTreeMap<(i64, i64), f64> = BTreeMap::new();
    let mut shared = 0;
    for per_rank in &results {
        for &(key, h) in per_rank {
            if let Some(&other) = seen.get(&key) {
                approx::assert_relative_eq!(h, other);
                shared += 1;
            } else {
                seen.insert(key, h);
            }
        }
    }
    assert_eq!(shared, 4);
}

#[test]
fn node_fields_are_smoothed_in_place() {
    let centre = |p: [f64; 3]| (p[0] - 0.5).abs() < 1e-9 && (p[1] - 0.5).abs() < 1e-9;
    let mut driver = serial_driver(DriverConfig::new(1.0, 0.01, 2), |p| if centre(p) { 1.0 } else { 0.0 });
    driver.transfer_field_to_library("pressure", &[3.0; 25], 1, 25).unwrap();
    driver.smooth_node_field("solution", 1, 0.5).unwrap();
    driver.smooth_node_field("pressure", 4, 0.5).unwrap();
    assert!(driver.size_field().is_none());

    let mesh = driver.mesh().unwrap();
    let u = mesh.field("solution").unwrap();
    for v in 0..mesh.count(EntityDim::Vertex) {
        let p = mesh.coords(v);
        let value = u.node(v)[0];
        if centre(p) {
            approx::assert_relative_eq!(value, 0.5);
        } else {
            assert!((0.0..0.5).contains(&value), "{value} at {p:?}");
        }
    }
    for &value in mesh.field("pressure").unwrap().values() {
        approx::assert_relative_eq!(value, 3.0, epsilon = 1e-12);
    }

    assert!(matches!(
        driver.smooth_node_field("temperature", 1, 0.5),
        Err(MeshAdaptError::FieldNotFound(_))
    ));
    assert!(matches!(driver.smooth_node_field("solution", 1, -0.1), Err(MeshAdaptError::Config(_))));
}

#[test]
fn smoothed_node_fields_agree_across_ranks() {
    let (global, subs) = square_parts(6, 3, CellType::Triangle, 2);
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let (mut driver, _g, sub) = parallel_driver(comm, DriverConfig::new(1.0, 0.001, 2), &global, &subs);
        let u: Vec<f64> = nodes(&sub).iter().map(|p| p[0] * p[1] + rank as f64).collect();
        driver.transfer_solution_to_library(&u, 1, u.len()).unwrap();
        driver.smooth_node_field("solution", 3, 0.5).unwrap();
        let mesh = driver.mesh().unwrap();
        let field = mesh.field("solution").unwrap();
        (0..mesh.count(EntityDim::Vertex))
            .map(|v| {
                let p = mesh.coords(v);
                (((p[0] * 1e6).round() as i64, (p[1] * 1e6).round() as i64), field.node(v)[0])
            })
            .collect::<Vec<_>>()
    });

    let mut seen: BTreeMap<(i64, i64), f64> = BTreeMap::new();
    let mut shared = 0;
    for per_rank in &results {
        for &(key, u) in per_rank {
            if let Some(&other) = seen.get(&key) {
                approx::assert_relative_eq!(u, other, epsilon = 1e-12);
                shared += 1;
            } else {
                seen.insert(key, u);
            }
        }
    }
    assert_eq!(shared, 4);
}

#[test]
fn nan_solution_gives_no_anisotropic_size_field() {
    let solution = |p: [f64; 3]| if p[0] > 0.6 { f64::NAN } else { p[0] * p[0] };
    let mut driver = serial_driver(DriverConfig::new(1.0, 0.001, 2), solution);
    let err = driver
        .calculate_aniso_size_field("solution", &AdaptParameters::default())
        .unwrap_err();
    assert!(matches!(err, MeshAdaptError::InvalidSizeField(_)));
    assert!(driver.size_field().is_none());
}
