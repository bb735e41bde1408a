//! `MeshAdaptDriver`: construction, transfer, size fields and adaptation.
//!
//! The driver owns one rank's [`DistributedMesh`], its [`NumberingTables`]
//! and the current size field. Its lifecycle:
//!
//! ```text
//!   Empty ──construct/load──▶ Stable ──adapt_mesh──▶ Adapted
//!                              ▲                        │
//!                              └────rebuild_*_mesh──────┘
//! ```
//!
//! In `Adapted` the numbering is stale, so field transfer and numbering
//! access are refused until the solver mesh has been rebuilt. All operations
//! that communicate are collective: every rank calls them in the same order.

use crate::adapt::{AdaptReport, AdaptRequest, AdaptService};
use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::{agree, all_reduce_sum};
use crate::config::{AdaptParameters, DriverConfig};
use crate::construct::import::{import_gmsh, import_parallel, import_serial};
use crate::construct::rebuild::{self, BoundaryIds};
use crate::field_transfer::{BufferShape, sync_size_field, transfer_to_library, transfer_to_solver};
use crate::geometry::metrics::cell_integral;
use crate::io::gmsh::{GmshReader, GmshWriter};
use crate::io::model::ModelReader;
use crate::io::read_path;
use crate::mesh::distributed::DistributedMesh;
use crate::mesh::field::SizeField;
use crate::mesh::model::GeometricModel;
use crate::mesh::sharing::broadcast_owned;
use crate::mesh_error::MeshAdaptError;
use crate::numbering::NumberingTables;
use crate::size_field::{anisotropic_size_field, component_values, isotropic_size_field, smooth_size_field, smooth_values};
use crate::solver_mesh::SolverMesh;
use crate::topology::entity::EntityDim;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Name of the field moved by the solution transfer wrappers.
pub const SOLUTION_FIELD: &str = "solution";

/// Lifecycle state of the driver's mesh.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MeshState {
    /// No mesh has been constructed or loaded.
    Empty,
    /// Mesh and numbering are current.
    Stable,
    /// The mesh was adapted; numbering and solver arrays are stale.
    Adapted,
}

pub struct MeshAdaptDriver<C: Communicator> {
    config: DriverConfig,
    comm: C,
    state: MeshState,
    model: Option<GeometricModel>,
    mesh: Option<DistributedMesh>,
    numbering: Option<NumberingTables>,
    size_field: Option<SizeField>,
    size_synchronized: bool,
    boundary_ids: BoundaryIds,
    remaps: Vec<(i32, i32)>,
    n_adapt: usize,
}

impl<C: Communicator> MeshAdaptDriver<C> {
    /// A driver with no mesh. Fails on an invalid configuration.
    pub fn new(config: DriverConfig, comm: C) -> Result<Self, MeshAdaptError> {
        config.validate()?;
        Ok(Self {
            config,
            comm,
            state: MeshState::Empty,
            model: None,
            mesh: None,
            numbering: None,
            size_field: None,
            size_synchronized: false,
            boundary_ids: BoundaryIds::new(),
            remaps: Vec::new(),
            n_adapt: 0,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn state(&self) -> MeshState {
        self.state
    }

    /// Adaptation passes completed so far.
    pub fn n_adapt(&self) -> usize {
        self.n_adapt
    }

    /// Configured bound on refinement passes per adaptation.
    pub fn num_iter(&self) -> usize {
        self.config.num_iter
    }

    pub fn model(&self) -> Option<&GeometricModel> {
        self.model.as_ref()
    }

    pub fn mesh(&self) -> Result<&DistributedMesh, MeshAdaptError> {
        self.mesh.as_ref().ok_or(MeshAdaptError::InvalidState {
            operation: "mesh",
            state: self.state,
        })
    }

    /// Numbering of the current mesh; unavailable between adaptation and rebuild.
    pub fn numbering(&self) -> Result<&NumberingTables, MeshAdaptError> {
        match (&self.numbering, self.state) {
            (Some(numbering), MeshState::Stable) => Ok(numbering),
            _ => Err(MeshAdaptError::InvalidState {
                operation: "numbering",
                state: self.state,
            }),
        }
    }

    pub fn size_field(&self) -> Option<&SizeField> {
        self.size_field.as_ref()
    }

    fn require(&self, operation: &'static str, state: MeshState) -> Result<(), MeshAdaptError> {
        if self.state == state {
            Ok(())
        } else {
            Err(MeshAdaptError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn stable_parts(&self, operation: &'static str) -> Result<(&DistributedMesh, &NumberingTables), MeshAdaptError> {
        self.require(operation, MeshState::Stable)?;
        match (&self.mesh, &self.numbering) {
            (Some(mesh), Some(numbering)) => Ok((mesh, numbering)),
            _ => Err(MeshAdaptError::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    /// Number `mesh` and make it current. Nothing changes on failure.
    fn install(&mut self, mesh: DistributedMesh) -> Result<(), MeshAdaptError> {
        let numbering = NumberingTables::build(&mesh, &self.comm)?;
        self.mesh = Some(mesh);
        self.numbering = Some(numbering);
        self.size_field = None;
        self.size_synchronized = false;
        self.state = MeshState::Stable;
        Ok(())
    }

    fn set_model(&mut self, model: GeometricModel) {
        self.boundary_ids = model.boundary_ids.clone();
        self.model = Some(model);
    }

    /// Load a JSON geometric model and a Gmsh mesh. Collective.
    ///
    /// With more than one rank `mesh_path` must contain `{rank}`, which is
    /// replaced by this rank's index.
    pub fn load_model_and_mesh(
        &mut self,
        model_path: impl AsRef<Path>,
        mesh_path: impl AsRef<Path>,
    ) -> Result<(), MeshAdaptError> {
        let read = || -> Result<_, MeshAdaptError> {
            let model = read_path(&ModelReader, model_path)?;
            let mesh_path = rank_path(mesh_path.as_ref(), self.comm.rank(), self.comm.size())?;
            Ok((model, read_path(&GmshReader, &mesh_path)?))
        };
        let (model, file) = agree(&self.comm, "reading the model and mesh", read())?;
        let mesh = import_gmsh(&file, Some(&model), &self.comm)?;
        self.install(mesh)?;
        self.set_model(model);
        Ok(())
    }

    /// Build the mesh and numbering from a single-partition solver mesh.
    pub fn construct_from_serial_mesh(&mut self, solver: &SolverMesh) -> Result<(), MeshAdaptError> {
        if self.comm.size() != 1 {
            return Err(MeshAdaptError::Config(format!(
                "a serial mesh needs a single-rank communicator, got {} ranks",
                self.comm.size()
            )));
        }
        let mesh = import_serial(solver, self.model.as_ref())?;
        self.install(mesh)
    }

    /// Build this rank's part from its subdomain mesh. Collective.
    pub fn construct_from_parallel_mesh(
        &mut self,
        global: &SolverMesh,
        subdomain: &SolverMesh,
    ) -> Result<(), MeshAdaptError> {
        let mesh = import_parallel(global, subdomain, self.model.as_ref(), &self.comm)?;
        self.install(mesh)
    }

    /// Renumber an adapted mesh; a no-op when the numbering is current.
    fn renumber(&mut self) -> Result<(), MeshAdaptError> {
        if self.state == MeshState::Adapted {
            let mesh = self.mesh()?;
            let numbering = NumberingTables::build(mesh, &self.comm)?;
            self.numbering = Some(numbering);
        }
        Ok(())
    }

    fn rebuild_inputs(&self, operation: &'static str) -> Result<(&DistributedMesh, &NumberingTables), MeshAdaptError> {
        match (&self.mesh, &self.numbering) {
            (Some(mesh), Some(numbering)) => Ok((mesh, numbering)),
            _ => Err(MeshAdaptError::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    /// Write the current mesh into `solver`. Collective after an adaptation.
    pub fn rebuild_serial_mesh(&mut self, solver: &mut SolverMesh) -> Result<(), MeshAdaptError> {
        if self.state == MeshState::Empty {
            return Err(MeshAdaptError::InvalidState {
                operation: "rebuild_serial_mesh",
                state: self.state,
            });
        }
        self.renumber()?;
        let (mesh, numbering) = self.rebuild_inputs("rebuild_serial_mesh")?;
        rebuild::rebuild_serial(mesh, numbering, solver, &self.boundary_ids, &self.remaps)?;
        self.state = MeshState::Stable;
        log::info!(
            "solver mesh rebuilt: {} nodes, {} elements",
            solver.n_nodes_global,
            solver.n_elements_global
        );
        Ok(())
    }

    /// Write this rank's part into `subdomain` and the partition metadata
    /// into `global`. Collective.
    pub fn rebuild_parallel_mesh(
        &mut self,
        global: &mut SolverMesh,
        subdomain: &mut SolverMesh,
    ) -> Result<(), MeshAdaptError> {
        if self.state == MeshState::Empty {
            return Err(MeshAdaptError::InvalidState {
                operation: "rebuild_parallel_mesh",
                state: self.state,
            });
        }
        self.renumber()?;
        let (mesh, numbering) = self.rebuild_inputs("rebuild_parallel_mesh")?;
        rebuild::rebuild_parallel(
            mesh,
            numbering,
            global,
            subdomain,
            &self.boundary_ids,
            &self.remaps,
            &self.comm,
        )?;
        self.state = MeshState::Stable;
        log::info!(
            "[rank {}] subdomain rebuilt: {} of {} nodes, {} of {} elements",
            self.comm.rank(),
            subdomain.n_nodes_owned,
            global.n_nodes_global,
            subdomain.n_elements_owned,
            global.n_elements_global
        );
        Ok(())
    }

    /// Re-tag boundaries classified on `geometric_tag` with `boundary_id`.
    ///
    /// The remapping is applied to `solver` now and to every later rebuild.
    /// Returns the number of local boundaries re-tagged.
    pub fn update_material_arrays(
        &mut self,
        solver: &mut SolverMesh,
        boundary_id: i32,
        geometric_tag: i32,
    ) -> Result<usize, MeshAdaptError> {
        let (mesh, numbering) = self.stable_parts("update_material_arrays")?;
        let updated = rebuild::update_material_arrays(mesh, numbering, solver, boundary_id, geometric_tag)?;
        self.remaps.push((boundary_id, geometric_tag));
        Ok(updated)
    }

    /// Set the owned counts of `solver` from the current numbering.
    pub fn init_solver_mesh(&self, solver: &mut SolverMesh) -> Result<(), MeshAdaptError> {
        let (mesh, numbering) = self.stable_parts("init_solver_mesh")?;
        rebuild::init_solver_mesh(mesh, numbering, solver)
    }

    /// Copy a solver buffer into the node field `name`.
    pub fn transfer_field_to_library(
        &mut self,
        name: &str,
        buffer: &[f64],
        num_vars: usize,
        num_nodes: usize,
    ) -> Result<(), MeshAdaptError> {
        self.require("transfer_field_to_library", MeshState::Stable)?;
        let layout = self.config.layout;
        match (&mut self.mesh, &self.numbering) {
            (Some(mesh), Some(numbering)) => transfer_to_library(
                mesh,
                numbering.local(EntityDim::Vertex)?,
                name,
                buffer,
                BufferShape::new(num_vars, num_nodes),
                layout,
            ),
            _ => Err(MeshAdaptError::InvalidState {
                operation: "transfer_field_to_library",
                state: self.state,
            }),
        }
    }

    /// Copy the node field `name` into a solver buffer.
    pub fn transfer_field_to_solver(
        &self,
        name: &str,
        buffer: &mut [f64],
        num_vars: usize,
        num_nodes: usize,
    ) -> Result<(), MeshAdaptError> {
        let (mesh, numbering) = self.stable_parts("transfer_field_to_solver")?;
        transfer_to_solver(
            mesh,
            numbering.local(EntityDim::Vertex)?,
            name,
            buffer,
            BufferShape::new(num_vars, num_nodes),
            self.config.layout,
        )
    }

    pub fn transfer_solution_to_library(
        &mut self,
        buffer: &[f64],
        num_vars: usize,
        num_nodes: usize,
    ) -> Result<(), MeshAdaptError> {
        self.transfer_field_to_library(SOLUTION_FIELD, buffer, num_vars, num_nodes)
    }

    pub fn transfer_solution_to_solver(
        &self,
        buffer: &mut [f64],
        num_vars: usize,
        num_nodes: usize,
    ) -> Result<(), MeshAdaptError> {
        self.transfer_field_to_solver(SOLUTION_FIELD, buffer, num_vars, num_nodes)
    }

    fn store_size_field(&mut self, size: SizeField) {
        self.size_field = Some(size);
        self.size_synchronized = self.comm.size() == 1;
    }

    /// Compute the isotropic size field of the current mesh. Collective.
    pub fn calculate_size_field(&mut self, params: &AdaptParameters) -> Result<(), MeshAdaptError> {
        let (mesh, _) = self.stable_parts("calculate_size_field")?;
        let size = isotropic_size_field(mesh, SOLUTION_FIELD, params, &self.config, &self.comm)?;
        self.store_size_field(size);
        Ok(())
    }

    /// Compute an anisotropic size field from the first component of the
    /// node field `field`. Collective.
    pub fn calculate_aniso_size_field(&mut self, field: &str, params: &AdaptParameters) -> Result<(), MeshAdaptError> {
        params.validate()?;
        let (mesh, _) = self.stable_parts("calculate_aniso_size_field")?;
        let values = component_values(mesh.field(field)?, 0)?;
        let mut size = anisotropic_size_field(mesh, &values, &params.anisotropy, &self.config, &self.comm)?;
        if params.smoothing_iterations > 0 {
            smooth_size_field(mesh, &mut size, params.smoothing_iterations, params.smoothing_weight, &self.comm)?;
        }
        log::info!("[rank {}] anisotropic size field computed from `{field}`", self.comm.rank());
        self.store_size_field(size);
        Ok(())
    }

    /// Smooth the current size field. Collective.
    pub fn smooth_field(&mut self, iterations: usize, weight: f64) -> Result<(), MeshAdaptError> {
        check_weight(weight)?;
        let (mesh, _) = self.stable_parts("smooth_field")?;
        let mut size = self.size_field.clone().ok_or(MeshAdaptError::MissingSizeField)?;
        smooth_size_field(mesh, &mut size, iterations, weight, &self.comm)?;
        if let SizeField::Isotropic(h) = &mut size {
            for v in h.values_mut() {
                *v = self.config.clamp(*v);
            }
        }
        self.store_size_field(size);
        Ok(())
    }

    /// Smooth every component of the node field `name` in place. Collective.
    ///
    /// Every copy of a shared vertex ends up with its owner's result. The
    /// size field is left alone.
    pub fn smooth_node_field(&mut self, name: &str, iterations: usize, weight: f64) -> Result<(), MeshAdaptError> {
        check_weight(weight)?;
        let (mesh, _) = self.stable_parts("smooth_node_field")?;
        let field = agree(&self.comm, "smooth_node_field", mesh.field(name))?;
        let width = field.components();
        let mut values = field.values().to_vec();
        smooth_values(mesh, &mut values, width, iterations, weight, &self.comm)?;
        broadcast_owned(mesh.overlap(), EntityDim::Vertex, &self.comm, tags::SMOOTHING, &mut values, width)?;
        if let Some(mesh) = &mut self.mesh {
            mesh.field_mut(name)?.values_mut().copy_from_slice(&values);
        }
        log::debug!("[rank {}] smoothed `{name}` with {iterations} sweeps", self.comm.rank());
        Ok(())
    }

    /// Make shared vertices agree on the size field. Collective.
    pub fn sync_size_field(&mut self) -> Result<(), MeshAdaptError> {
        self.require("sync_size_field", MeshState::Stable)?;
        let (Some(mesh), Some(size)) = (&self.mesh, &mut self.size_field) else {
            return Err(MeshAdaptError::MissingSizeField);
        };
        sync_size_field(mesh, size, &self.comm)?;
        self.size_synchronized = true;
        Ok(())
    }

    /// Adapt the mesh to the current size field. Collective.
    ///
    /// The new mesh replaces the old one only when the service succeeds; on
    /// failure the driver is unchanged.
    pub fn adapt_mesh<S: AdaptService>(&mut self, service: &S) -> Result<AdaptReport, MeshAdaptError> {
        let (mesh, _) = self.stable_parts("adapt_mesh")?;
        let size = self.size_field.as_ref().ok_or(MeshAdaptError::MissingSizeField)?;
        if !self.size_synchronized {
            return Err(MeshAdaptError::SizeFieldNotSynchronized);
        }
        let request = AdaptRequest {
            max_iterations: self.config.num_iter,
        };
        let outcome = service.adapt(mesh, size, &request, &self.comm)?;

        self.mesh = Some(outcome.mesh);
        self.numbering = None;
        self.size_field = None;
        self.size_synchronized = false;
        self.n_adapt += 1;
        self.state = MeshState::Adapted;
        log::info!(
            "[rank {}] adaptation {} done: {} → {} elements in {} passes",
            self.comm.rank(),
            self.n_adapt,
            outcome.report.elements_before,
            outcome.report.elements_after,
            outcome.report.passes
        );
        Ok(outcome.report)
    }

    /// Integral over the whole domain of one component of a node field. Collective.
    pub fn field_integral(&self, name: &str, component: usize) -> Result<f64, MeshAdaptError> {
        let mesh = self.mesh()?;
        let values = component_values(mesh.field(name)?, component)?;
        let ed = mesh.element_dim();
        let local: f64 = (0..mesh.count(ed))
            .map(|e| {
                let verts = mesh.vertices(ed, e);
                let pts: Vec<[f64; 3]> = verts.iter().map(|&v| mesh.coords(v)).collect();
                let vals: Vec<f64> = verts.iter().map(|&v| values[v]).collect();
                cell_integral(mesh.cell_type(), &pts, &vals)
            })
            .sum();
        all_reduce_sum(&self.comm, tags::ALL_GATHER, local)
    }

    /// Write this rank's mesh as Gmsh, node tags being global ids + 1.
    ///
    /// `{rank}` in `path` is replaced by this rank's index.
    pub fn write_mesh(&self, path: impl AsRef<Path>) -> Result<(), MeshAdaptError> {
        let (mesh, numbering) = self.stable_parts("write_mesh")?;
        let path = rank_path(path.as_ref(), self.comm.rank(), self.comm.size())?;
        let tags: Vec<u64> = numbering
            .global(EntityDim::Vertex)?
            .ids()
            .iter()
            .map(|id| id + 1)
            .collect();
        let file = File::create(&path).map_err(|err| MeshAdaptError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        GmshWriter.write(BufWriter::new(file), mesh, &tags)
    }
}

fn check_weight(weight: f64) -> Result<(), MeshAdaptError> {
    if (0.0..=1.0).contains(&weight) {
        Ok(())
    } else {
        Err(MeshAdaptError::Config(format!(
            "smoothing weight must lie in [0, 1], got {weight}"
        )))
    }
}

/// Substitute `{rank}` in a per-rank path; required with more than one rank.
fn rank_path(path: &Path, rank: usize, size: usize) -> Result<PathBuf, MeshAdaptError> {
    let text = path.to_string_lossy();
    if text.contains("{rank}") {
        Ok(PathBuf::from(text.replace("{rank}", &rank.to_string())))
    } else if size > 1 {
        Err(MeshAdaptError::Config(format!(
            "`{text}` must contain `{{rank}}` when running on {size} ranks"
        )))
    } else {
        Ok(path.to_path_buf())
    }
}
