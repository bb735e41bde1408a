#![allow(dead_code)]
use mesh_adapt_driver::algs::communicator::LocalComm;
use mesh_adapt_driver::algs::meshgen::unit_square;
use mesh_adapt_driver::algs::partition::{slab_parts, split_by_elements};
use mesh_adapt_driver::config::DriverConfig;
use mesh_adapt_driver::driver::MeshAdaptDriver;
use mesh_adapt_driver::solver_mesh::SolverMesh;
use mesh_adapt_driver::topology::cell_type::CellType;

/// Run `f` on every rank of an in-process world; results come back by rank.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let comms = LocalComm::world(size);
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// The unit square cut into `n_parts` slabs along x.
pub fn square_parts(nx: usize, ny: usize, cell: CellType, n_parts: usize) -> (SolverMesh, Vec<SolverMesh>) {
    let global = unit_square(nx, ny, cell).unwrap();
    let parts = slab_parts(&global, n_parts, 0);
    let subs = split_by_elements(&global, &parts, n_parts).unwrap();
    (global, subs)
}

/// A driver on this rank's slab, with the solver arrays rebuilt from it.
pub fn parallel_driver(
    comm: LocalComm,
    config: DriverConfig,
    global: &SolverMesh,
    subs: &[SolverMesh],
) -> (MeshAdaptDriver<LocalComm>, SolverMesh, SolverMesh) {
    use mesh_adapt_driver::algs::communicator::Communicator;
    let rank = comm.rank();
    let mut driver = MeshAdaptDriver::new(config, comm).unwrap();
    driver.construct_from_parallel_mesh(global, &subs[rank]).unwrap();
    let (mut g, mut s) = (SolverMesh::default(), SolverMesh::default());
    driver.rebuild_parallel_mesh(&mut g, &mut s).unwrap();
    (driver, g, s)
}

/// Node coordinates of a solver mesh.
pub fn nodes(mesh: &SolverMesh) -> Vec<[f64; 3]> {
    (0..mesh.n_nodes_global).map(|n| mesh.node(n)).collect()
}
