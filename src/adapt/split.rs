//! Conforming edge-split refinement of 2D meshes.
//!
//! Each pass marks every edge whose metric length exceeds `split_ratio`,
//! inserts a vertex at the middle of each marked edge and replaces every
//! element by the template matching its marked edges:
//!
//! - triangles: one, two or three marked edges give 2, 3 or 4 triangles;
//! - quads: two opposite marked edges give 2 quads, all four give 4 quads
//!   around a centre vertex. Any other pattern is first closed to one of
//!   these (one mark adds the opposite edge, adjacent or three marks take
//!   all four), with the closure iterated across ranks until no rank adds a
//!   mark, so every copy of a shared edge agrees.
//!
//! Old vertices keep their local index and their links; the midpoint of a
//! shared edge is linked to its copies through the edge links of the old
//! mesh. Node fields and the size field are averaged onto new vertices.

use crate::adapt::{AdaptOutcome, AdaptReport, AdaptRequest, AdaptService};
use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::{agree, all_reduce_count};
use crate::mesh::builder::MeshBuilder;
use crate::mesh::distributed::{DistributedMesh, sub};
use crate::mesh::field::{NodeField, SizeField};
use crate::mesh::sharing::{reduce_classification, exchange_records, reduce_shared, resolve_entity_sharing};
use crate::mesh_error::MeshAdaptError;
use crate::overlap::delta::MaxDelta;
use crate::topology::cell_type::CellType;
use crate::topology::entity::EntityDim;

/// Reference adaptation service: template refinement of long edges.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeSplitAdapter {
    /// Metric length above which an edge is split.
    pub split_ratio: f64,
}

impl Default for EdgeSplitAdapter {
    fn default() -> Self {
        Self { split_ratio: 1.5 }
    }
}

impl EdgeSplitAdapter {
    pub fn new(split_ratio: f64) -> Self {
        Self { split_ratio }
    }

    /// Local checks; run by every rank before the first exchange.
    fn check_inputs(&self, mesh: &DistributedMesh, size: &SizeField) -> Result<(), MeshAdaptError> {
        if mesh.dim() != 2 {
            return Err(MeshAdaptError::AdaptationFailed(format!(
                "edge splitting supports 2D meshes only, got a {}D {:?} mesh",
                mesh.dim(),
                mesh.cell_type()
            )));
        }
        if !(self.split_ratio.is_finite() && self.split_ratio > 0.0) {
            return Err(MeshAdaptError::Config(format!(
                "split_ratio must be positive, got {}",
                self.split_ratio
            )));
        }
        let n = mesh.count(EntityDim::Vertex);
        if size.num_nodes() != n {
            return Err(MeshAdaptError::ShapeMismatch {
                what: "size field nodes",
                expected: n,
                found: size.num_nodes(),
            });
        }
        size.validate()?;
        Ok(())
    }

    fn mark_edges(&self, mesh: &DistributedMesh, size: &SizeField) -> Vec<bool> {
        (0..mesh.count(EntityDim::Edge))
            .map(|e| {
                let v = mesh.vertices(EntityDim::Edge, e);
                let along = sub(mesh.coords(v[1]), mesh.coords(v[0]));
                let length = 0.5 * (size.metric_length(v[0], along) + size.metric_length(v[1], along));
                length > self.split_ratio
            })
            .collect()
    }
}

impl AdaptService for EdgeSplitAdapter {
    fn adapt<C: Communicator>(
        &self,
        mesh: &DistributedMesh,
        size: &SizeField,
        request: &AdaptRequest,
        comm: &C,
    ) -> Result<AdaptOutcome, MeshAdaptError> {
        agree(comm, "adaptation input", self.check_inputs(mesh, size))?;

        let me = comm.rank();
        let mut report = AdaptReport {
            elements_before: all_reduce_count(comm, tags::ALL_GATHER, mesh.count(mesh.element_dim()))?,
            ..AdaptReport::default()
        };
        let mut current = mesh.clone();
        let mut size = size.clone();

        for pass in 0..=request.max_iterations {
            let mut marks = self.mark_edges(&current, &size);
            if current.cell_type() == CellType::Quadrilateral {
                close_quad_marks(&current, &mut marks, comm)?;
            }
            check_shared_marks(&current, &marks, comm)?;
            let owned_marked = marks
                .iter()
                .enumerate()
                .filter(|&(e, &m)| m && current.is_owned(EntityDim::Edge, e))
                .count();
            let total = all_reduce_count(comm, tags::SPLIT_MARKS, owned_marked)?;
            if total == 0 {
                report.converged = true;
                break;
            }
            if pass == request.max_iterations {
                break;
            }
            let (next, next_size) = split_marked(&current, &size, &marks, comm)?;
            current = next;
            size = next_size;
            report.passes += 1;
            report.split_edges += total;
            log::info!(
                "[rank {me}] split pass {}: {total} edges split, {} local elements",
                report.passes,
                current.count(current.element_dim())
            );
        }
        if !report.converged {
            log::warn!(
                "[rank {me}] edge splitting stopped after {} passes with edges still longer than {}",
                report.passes,
                self.split_ratio
            );
        }
        report.elements_after = all_reduce_count(comm, tags::ALL_GATHER, current.count(current.element_dim()))?;
        Ok(AdaptOutcome { mesh: current, report })
    }
}

/// Close quad marks to a valid template; returns the number of marks added.
fn close_quads_locally(mesh: &DistributedMesh, marks: &mut [bool]) -> usize {
    let mut added = 0;
    loop {
        let mut changed = 0;
        for e in 0..mesh.count(mesh.element_dim()) {
            let edges = mesh.element_edges(e);
            let m: Vec<bool> = edges.iter().map(|&x| marks[x]).collect();
            let wanted: [bool; 4] = match m.iter().filter(|&&b| b).count() {
                0 => continue,
                1 => {
                    let i = m.iter().position(|&b| b).unwrap_or(0);
                    let mut w = [false; 4];
                    w[i] = true;
                    w[(i + 2) % 4] = true;
                    w
                }
                2 if m[0] == m[2] => continue,
                _ => [true; 4],
            };
            for (&edge, want) in edges.iter().zip(wanted) {
                if want && !marks[edge] {
                    marks[edge] = true;
                    changed += 1;
                }
            }
        }
        if changed == 0 {
            return added;
        }
        added += changed;
    }
}

/// Iterate the quad closure to a fix point over all ranks. Collective.
fn close_quad_marks<C: Communicator>(
    mesh: &DistributedMesh,
    marks: &mut [bool],
    comm: &C,
) -> Result<(), MeshAdaptError> {
    loop {
        let mut changed = close_quads_locally(mesh, marks);
        let mut values: Vec<f64> = marks.iter().map(|&m| if m { 1.0 } else { 0.0 }).collect();
        reduce_shared::<MaxDelta, C>(mesh.overlap(), EntityDim::Edge, comm, tags::SPLIT_MARKS, &mut values, 1)?;
        for (mark, v) in marks.iter_mut().zip(&values) {
            if *v > 0.5 && !*mark {
                *mark = true;
                changed += 1;
            }
        }
        if all_reduce_count(comm, tags::SPLIT_MARKS, changed)? == 0 {
            return Ok(());
        }
    }
}

/// Every copy of a shared edge must carry the same mark. Collective.
fn check_shared_marks<C: Communicator>(
    mesh: &DistributedMesh,
    marks: &[bool],
    comm: &C,
) -> Result<(), MeshAdaptError> {
    let records = exchange_records(
        mesh.overlap(),
        EntityDim::Edge,
        comm,
        tags::SPLIT_MARKS,
        1,
        marks.len(),
        |edge, _, buf| {
            buf.push(u64::from(marks[edge]));
            true
        },
    )?;
    let mismatched = records
        .iter()
        .filter(|r| (r.words[0] == 1) != marks[r.local])
        .count();
    let total = all_reduce_count(comm, tags::SPLIT_MARKS, mismatched)?;
    if total > 0 {
        return Err(MeshAdaptError::DistributedConsistency(format!(
            "{total} shared edge marks differ between copies"
        )));
    }
    Ok(())
}

/// Children of a triangle `(v0, v1, v2)` given the midpoints of its edges
/// `(v0,v1)`, `(v1,v2)`, `(v2,v0)`.
fn triangle_children(v: &[usize], m: [Option<usize>; 3]) -> Result<Vec<Vec<usize>>, MeshAdaptError> {
    let marked: Vec<usize> = (0..3).filter(|&i| m[i].is_some()).collect();
    // rotate so that the marked edges come first
    let r = match marked.len() {
        1 => marked[0],
        2 => (0..3).find(|i| !marked.contains(i)).map_or(0, |u| (u + 1) % 3),
        _ => 0,
    };
    let (a, b, c) = (v[r], v[(r + 1) % 3], v[(r + 2) % 3]);
    match (m[r], m[(r + 1) % 3], m[(r + 2) % 3]) {
        (None, None, None) => Ok(vec![vec![a, b, c]]),
        (Some(m0), None, None) => Ok(vec![vec![a, m0, c], vec![m0, b, c]]),
        (Some(m0), Some(m1), None) => Ok(vec![vec![m0, b, m1], vec![a, m0, m1], vec![a, m1, c]]),
        (Some(m0), Some(m1), Some(m2)) => Ok(vec![
            vec![a, m0, m2],
            vec![b, m1, m0],
            vec![c, m2, m1],
            vec![m0, m1, m2],
        ]),
        _ => Err(MeshAdaptError::AdaptationFailed(format!(
            "no triangle template for marks {:?}",
            m.map(|x| x.is_some())
        ))),
    }
}

/// Children of a quad whose marks are already closed. `centre` is called
/// only for the four-edge template.
fn quad_children(
    v: &[usize],
    m: [Option<usize>; 4],
    centre: impl FnOnce() -> usize,
) -> Result<Vec<Vec<usize>>, MeshAdaptError> {
    match m {
        [None, None, None, None] => Ok(vec![v.to_vec()]),
        [Some(m0), None, Some(m2), None] => Ok(vec![vec![v[0], m0, m2, v[3]], vec![m0, v[1], v[2], m2]]),
        [None, Some(m1), None, Some(m3)] => Ok(vec![vec![v[0], v[1], m1, m3], vec![m3, m1, v[2], v[3]]]),
        [Some(m0), Some(m1), Some(m2), Some(m3)] => {
            let c = centre();
            Ok(vec![
                vec![v[0], m0, c, m3],
                vec![m0, v[1], m1, c],
                vec![c, m1, v[2], m2],
                vec![m3, c, m2, v[3]],
            ])
        }
        _ => Err(MeshAdaptError::AdaptationFailed(format!(
            "quad marks {:?} were not closed",
            m.map(|x| x.is_some())
        ))),
    }
}

fn mean_point(mesh: &DistributedMesh, verts: &[usize]) -> [f64; 3] {
    let mut p = [0.0; 3];
    for &v in verts {
        let x = mesh.coords(v);
        for k in 0..3 {
            p[k] += x[k] / verts.len() as f64;
        }
    }
    p
}

/// One refinement pass over the marked edges. Collective.
fn split_marked<C: Communicator>(
    mesh: &DistributedMesh,
    size: &SizeField,
    marks: &[bool],
    comm: &C,
) -> Result<(DistributedMesh, SizeField), MeshAdaptError> {
    let (mut next, size, midpoint) = agree(comm, "edge split", split_locally(mesh, size, marks))?;

    let overlap = next.overlap_mut();
    for (local, copies) in mesh.overlap().shared(EntityDim::Vertex) {
        for copy in copies {
            overlap.add_link(EntityDim::Vertex, local, copy.rank, copy.remote_index);
        }
    }
    let records = exchange_records(
        mesh.overlap(),
        EntityDim::Edge,
        comm,
        tags::SPLIT_VERTICES,
        1,
        midpoint.len(),
        |edge, _, buf| match midpoint[edge] {
            Some(m) => {
                buf.push(m as u64);
                true
            }
            None => false,
        },
    )?;
    for r in records {
        let m = midpoint[r.local].ok_or_else(|| {
            MeshAdaptError::DistributedConsistency(format!(
                "rank {} split edge {} that rank {} kept",
                r.from,
                r.local,
                comm.rank()
            ))
        })?;
        overlap.add_link(EntityDim::Vertex, m, r.from, r.words[0] as usize);
    }
    resolve_entity_sharing(&mut next, comm)?;
    reduce_classification(&mut next, comm)?;
    next.refresh_ownership();
    Ok((next, size))
}

/// Build the refined local part; returns it with its size field and the
/// midpoint vertex of every split edge.
fn split_locally(
    mesh: &DistributedMesh,
    size: &SizeField,
    marks: &[bool],
) -> Result<(DistributedMesh, SizeField, Vec<Option<usize>>), MeshAdaptError> {
    let cell = mesh.cell_type();
    let ed = mesh.element_dim();
    let mut builder = MeshBuilder::new(cell, mesh.rank(), mesh.size());
    let mut fields: Vec<NodeField> = mesh.fields().cloned().collect();
    let mut size = size.clone();

    for v in 0..mesh.count(EntityDim::Vertex) {
        builder.add_vertex(mesh.coords(v));
        builder.classify_vertex(v, mesh.classification(EntityDim::Vertex, v));
    }

    let mut midpoint: Vec<Option<usize>> = vec![None; mesh.count(EntityDim::Edge)];
    for (edge, _) in marks.iter().enumerate().filter(|&(_, &m)| m) {
        let ends = mesh.vertices(EntityDim::Edge, edge);
        let class = mesh.classification(EntityDim::Edge, edge);
        let m = builder.add_vertex(mean_point(mesh, ends));
        builder.classify_vertex(m, class);
        for f in &mut fields {
            f.push_average(ends);
        }
        size.push_average(ends);
        midpoint[edge] = Some(m);
        builder.classify_entity(EntityDim::Edge, &[ends[0], m], class);
        builder.classify_entity(EntityDim::Edge, &[m, ends[1]], class);
    }
    for edge in (0..mesh.count(EntityDim::Edge)).filter(|&e| !marks[e]) {
        builder.classify_entity(
            EntityDim::Edge,
            mesh.vertices(EntityDim::Edge, edge),
            mesh.classification(EntityDim::Edge, edge),
        );
    }

    for e in 0..mesh.count(ed) {
        let verts = mesh.vertices(ed, e);
        let class = mesh.classification(ed, e);
        let mids: Vec<Option<usize>> = mesh.element_edges(e).iter().map(|&x| midpoint[x]).collect();
        let children = match (cell, mids.as_slice()) {
            (CellType::Triangle, &[m0, m1, m2]) => triangle_children(verts, [m0, m1, m2])?,
            (CellType::Quadrilateral, &[m0, m1, m2, m3]) => quad_children(verts, [m0, m1, m2, m3], || {
                let c = builder.add_vertex(mean_point(mesh, verts));
                builder.classify_vertex(c, class);
                for f in &mut fields {
                    f.push_average(verts);
                }
                size.push_average(verts);
                c
            })?,
            _ => {
                return Err(MeshAdaptError::AdaptationFailed(format!(
                    "element {e} has {} edges",
                    mids.len()
                )));
            }
        };
        for child in children {
            builder.add_element(&child, class)?;
        }
    }
    for f in fields {
        builder.attach_field(f);
    }
    let next = builder.finish().map_err(|err| match err {
        MeshAdaptError::TopologyMismatch(msg) => MeshAdaptError::AdaptationFailed(msg),
        other => other,
    })?;
    Ok((next, size, midpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::meshgen::unit_square;
    use crate::construct::import::import_serial;
    use crate::geometry::metrics::cell_measure;
    use approx::assert_relative_eq;

    fn uniform(mesh: &DistributedMesh, h: f64) -> SizeField {
        let n = mesh.count(EntityDim::Vertex);
        SizeField::Isotropic(NodeField::from_values("size", 1, vec![h; n]).unwrap())
    }

    fn area(mesh: &DistributedMesh) -> f64 {
        let ed = mesh.element_dim();
        (0..mesh.count(ed))
            .map(|e| {
                let pts: Vec<[f64; 3]> = mesh.vertices(ed, e).iter().map(|&v| mesh.coords(v)).collect();
                cell_measure(mesh.cell_type(), &pts)
            })
            .sum()
    }

    /// Every edge bounds two elements, or one when it lies on the square's boundary.
    fn assert_conforming(mesh: &DistributedMesh) {
        let ed = mesh.element_dim();
        let mut uses = vec![0; mesh.count(EntityDim::Edge)];
        for e in 0..mesh.count(ed) {
            for &x in mesh.downward(e, EntityDim::Edge) {
                uses[x] += 1;
            }
        }
        for (edge, &n) in uses.iter().enumerate() {
            let v = mesh.vertices(EntityDim::Edge, edge);
            let (a, b) = (mesh.coords(v[0]), mesh.coords(v[1]));
            let on_side = (0..2).any(|k| (a[k] == b[k]) && (a[k] == 0.0 || a[k] == 1.0));
            assert_eq!(n, if on_side { 1 } else { 2 }, "edge {v:?}");
        }
    }

    #[test]
    fn uniform_quad_refinement_converges() {
        let mesh = import_serial(&unit_square(2, 2, CellType::Quadrilateral).unwrap(), None).unwrap();
        let size = uniform(&mesh, 0.25);
        let out = EdgeSplitAdapter::default()
            .adapt(&mesh, &size, &AdaptRequest { max_iterations: 5 }, &NoComm)
            .unwrap();
        assert_eq!(out.report.passes, 1);
        assert!(out.report.converged);
        assert_eq!(out.report.split_edges, 12);
        assert_eq!((out.report.elements_before, out.report.elements_after), (4, 16));
        assert_relative_eq!(area(&out.mesh), 1.0, epsilon = 1e-12);
        assert_conforming(&out.mesh);
    }

    #[test]
    fn local_quad_refinement_stays_conforming() {
        let mesh = import_serial(&unit_square(4, 4, CellType::Quadrilateral).unwrap(), None).unwrap();
        let n = mesh.count(EntityDim::Vertex);
        let sizes: Vec<f64> = (0..n).map(|v| if v == 0 { 0.05 } else { 1.0 }).collect();
        let size = SizeField::Isotropic(NodeField::from_values("size", 1, sizes).unwrap());
        let out = EdgeSplitAdapter::default()
            .adapt(&mesh, &size, &AdaptRequest { max_iterations: 2 }, &NoComm)
            .unwrap();
        assert!(out.report.elements_after > 16);
        assert_eq!(out.mesh.cell_type(), CellType::Quadrilateral);
        assert_relative_eq!(area(&out.mesh), 1.0, epsilon = 1e-12);
        assert_conforming(&out.mesh);
    }

    #[test]
    fn triangles_interpolate_linear_fields_exactly() {
        let mut mesh = import_serial(&unit_square(1, 1, CellType::Triangle).unwrap(), None).unwrap();
        let u: Vec<f64> = mesh.coordinates().iter().map(|p| 1.0 + 2.0 * p[0] - p[1]).collect();
        mesh.attach_field(NodeField::from_values("solution", 1, u).unwrap()).unwrap();
        let size = uniform(&mesh, 0.4);
        let out = EdgeSplitAdapter::default()
            .adapt(&mesh, &size, &AdaptRequest { max_iterations: 10 }, &NoComm)
            .unwrap();
        assert!(out.report.converged);
        assert!(out.report.passes >= 1);
        assert_relative_eq!(area(&out.mesh), 1.0, epsilon = 1e-12);
        assert_conforming(&out.mesh);

        let field = out.mesh.field("solution").unwrap();
        for (v, p) in out.mesh.coordinates().iter().enumerate() {
            assert_relative_eq!(field.node(v)[0], 1.0 + 2.0 * p[0] - p[1], epsilon = 1e-12);
        }
        for e in 0..out.mesh.count(EntityDim::Edge) {
            assert!(out.mesh.edge_length(e) / 0.4 <= 1.5);
        }
    }

    #[test]
    fn boundary_classification_survives_splitting() {
        let mesh = import_serial(&unit_square(1, 1, CellType::Quadrilateral).unwrap(), None).unwrap();
        let out = EdgeSplitAdapter::default()
            .adapt(&mesh, &uniform(&mesh, 0.5), &AdaptRequest { max_iterations: 1 }, &NoComm)
            .unwrap();
        let bottom_mid = (0..out.mesh.count(EntityDim::Vertex))
            .find(|&v| out.mesh.coords(v) == [0.5, 0.0, 0.0])
            .unwrap();
        assert_eq!(out.mesh.classification(EntityDim::Vertex, bottom_mid).tag, 1);
        let centre = (0..out.mesh.count(EntityDim::Vertex))
            .find(|&v| out.mesh.coords(v) == [0.5, 0.5, 0.0])
            .unwrap();
        assert_eq!(out.mesh.classification(EntityDim::Vertex, centre).dim, 2);
    }

    #[test]
    fn rejects_3d_meshes() {
        let cube = crate::algs::meshgen::unit_cube(1, CellType::Tetrahedron).unwrap();
        let mesh = import_serial(&cube, None).unwrap();
        let err = EdgeSplitAdapter::default()
            .adapt(&mesh, &uniform(&mesh, 0.1), &AdaptRequest { max_iterations: 1 }, &NoComm)
            .unwrap_err();
        assert!(matches!(err, MeshAdaptError::AdaptationFailed(_)));
    }
}
