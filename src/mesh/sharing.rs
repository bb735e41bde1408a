//! Cross-rank resolution of shared entities and value exchange over overlaps.
//!
//! Sharing is resolved in three steps, all of them collective:
//! 1. [`resolve_vertex_sharing`]: a rendezvous on a global vertex key; each
//!    key's *home* rank collects every copy and tells each holder where the
//!    other copies live.
//! 2. [`resolve_entity_sharing`]: for every higher-dimensional entity whose
//!    vertices are all shared with some rank, the candidate vertex tuple is
//!    sent to that rank, which links it if it holds the same entity.
//! 3. [`reduce_classification`]: every copy takes the lowest classification
//!    held by any copy.
//!
//! [`exchange_records`] is the building block for everything that moves
//! per-entity data along overlap links. Each record carries the receiver's
//! local index, so records may be filtered freely on the sending side.

use crate::algs::communicator::{CommTag, Communicator, tags};
use crate::algs::exchange::{exchange_pod, other_ranks};
use crate::algs::wire::WIRE_NONE;
use crate::mesh::distributed::DistributedMesh;
use crate::mesh_error::MeshAdaptError;
use crate::overlap::delta::{CopyDelta, Delta};
use crate::overlap::overlap::{Overlap, Remote};
use crate::topology::entity::{Classification, EntityDim};
use std::collections::{BTreeMap, BTreeSet};

/// A record received for one local shared entity.
#[derive(Clone, Debug, PartialEq)]
pub struct SharedRecord {
    pub local: usize,
    pub from: usize,
    pub words: Vec<u64>,
}

/// Send `width` words per (shared entity, copy) and collect what arrives.
///
/// `pack(local, copy, buf)` appends exactly `width` words and returns `true`,
/// or returns `false` to skip that copy.
pub fn exchange_records<C, F>(
    overlap: &Overlap,
    dim: EntityDim,
    comm: &C,
    tag: CommTag,
    width: usize,
    count: usize,
    mut pack: F,
) -> Result<Vec<SharedRecord>, MeshAdaptError>
where
    C: Communicator,
    F: FnMut(usize, &Remote, &mut Vec<u64>) -> bool,
{
    let neighbours = overlap.neighbours(dim);
    let mut outgoing: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
    for (local, copies) in overlap.shared(dim) {
        for copy in copies {
            let buf = outgoing.entry(copy.rank).or_default();
            let start = buf.len();
            buf.push(copy.remote_index as u64);
            if !pack(local, copy, buf) {
                buf.truncate(start);
            } else if buf.len() != start + 1 + width {
                return Err(MeshAdaptError::DistributedConsistency(format!(
                    "packed {} words for {dim:?} {local}, expected {width}",
                    buf.len() - start - 1
                )));
            }
        }
    }

    let incoming = exchange_pod(comm, tag, &outgoing, &neighbours)?;
    let mut records = Vec::new();
    for (nbr, words) in incoming {
        if words.len() % (width + 1) != 0 {
            return Err(MeshAdaptError::BufferSizeMismatch {
                neighbor: nbr,
                expected: (words.len() / (width + 1) + 1) * (width + 1) * 8,
                got: words.len() * 8,
            });
        }
        for chunk in words.chunks_exact(width + 1) {
            let local = chunk[0] as usize;
            if local >= count {
                return Err(MeshAdaptError::DistributedConsistency(format!(
                    "rank {nbr} addressed {dim:?} {local}, but only {count} exist"
                )));
            }
            records.push(SharedRecord {
                local,
                from: nbr,
                words: chunk[1..].to_vec(),
            });
        }
    }
    Ok(records)
}

/// Fuse `width` values per entity over every copy with the rule `D`.
///
/// Every copy sends its own value before fusing, so after the call all copies
/// hold the same result.
pub fn reduce_shared<D, C>(
    overlap: &Overlap,
    dim: EntityDim,
    comm: &C,
    tag: CommTag,
    values: &mut [f64],
    width: usize,
) -> Result<(), MeshAdaptError>
where
    D: Delta<f64, Part = f64>,
    C: Communicator,
{
    let count = values.len() / width.max(1);
    let records = exchange_records(overlap, dim, comm, tag, width, count, |local, _, buf| {
        buf.extend(values[local * width..(local + 1) * width].iter().map(|v| v.to_bits()));
        true
    })?;
    for r in records {
        for (k, w) in r.words.iter().enumerate() {
            D::fuse(&mut values[r.local * width + k], D::restrict(&f64::from_bits(*w)));
        }
    }
    Ok(())
}

/// Overwrite every ghost copy with its owner's `width` values.
pub fn broadcast_owned<C: Communicator>(
    overlap: &Overlap,
    dim: EntityDim,
    comm: &C,
    tag: CommTag,
    values: &mut [f64],
    width: usize,
) -> Result<(), MeshAdaptError> {
    let me = comm.rank();
    let count = values.len() / width.max(1);
    let records = exchange_records(overlap, dim, comm, tag, width, count, |local, _, buf| {
        if overlap.owner(dim, local, me) != me {
            return false;
        }
        buf.extend(values[local * width..(local + 1) * width].iter().map(|v| v.to_bits()));
        true
    })?;
    for r in records {
        if r.from != overlap.owner(dim, r.local, me) {
            continue;
        }
        for (k, w) in r.words.iter().enumerate() {
            CopyDelta::fuse(&mut values[r.local * width + k], f64::from_bits(*w));
        }
    }
    Ok(())
}

/// Link vertex copies that carry the same global `keys[v]`.
///
/// `home(key)` picks the rank that collects the copies of `key`.
pub fn resolve_vertex_sharing<C, H>(
    mesh: &mut DistributedMesh,
    keys: &[u64],
    home: H,
    comm: &C,
) -> Result<(), MeshAdaptError>
where
    C: Communicator,
    H: Fn(u64) -> usize,
{
    if keys.len() != mesh.count(EntityDim::Vertex) {
        return Err(MeshAdaptError::ArrayLengthMismatch {
            array: "vertex keys",
            expected: mesh.count(EntityDim::Vertex),
            found: keys.len(),
        });
    }
    let me = comm.rank();
    let others = other_ranks(comm);

    // 1) every vertex reports (key, local index) to its home rank
    let mut to_home: BTreeMap<usize, Vec<[u64; 2]>> = BTreeMap::new();
    let mut copies: BTreeMap<u64, Vec<(usize, u64)>> = BTreeMap::new();
    for (v, &key) in keys.iter().enumerate() {
        let h = home(key);
        if h >= comm.size() {
            return Err(MeshAdaptError::DistributedConsistency(format!(
                "vertex key {key} maps to rank {h} of {}",
                comm.size()
            )));
        }
        if h == me {
            copies.entry(key).or_default().push((me, v as u64));
        } else {
            to_home.entry(h).or_default().push([key, v as u64]);
        }
    }
    let reports = exchange_pod(comm, tags::VERTEX_RENDEZVOUS, &to_home, &others)?;
    for (nbr, recs) in reports {
        for [key, v] in recs {
            copies.entry(key).or_default().push((nbr, v));
        }
    }

    // 2) home tells each holder where the other copies are
    let mut replies: BTreeMap<usize, Vec<[u64; 3]>> = BTreeMap::new();
    let mut maybe_err = None;
    for (key, holders) in &copies {
        let ranks: BTreeSet<usize> = holders.iter().map(|&(r, _)| r).collect();
        if ranks.len() != holders.len() {
            // keep going so every rank still reaches the second exchange
            maybe_err.get_or_insert_with(|| {
                MeshAdaptError::TopologyMismatch(format!("vertex key {key} appears twice on one rank"))
            });
            continue;
        }
        for &(holder, local) in holders {
            for &(other, remote) in holders.iter().filter(|(r, _)| *r != holder) {
                replies
                    .entry(holder)
                    .or_default()
                    .push([local, other as u64, remote]);
            }
        }
    }
    let own = replies.remove(&me).unwrap_or_default();
    let received = exchange_pod(comm, tags::VERTEX_COPIES, &replies, &others)?;
    if let Some(err) = maybe_err {
        return Err(err);
    }

    let n_vertices = mesh.count(EntityDim::Vertex);
    let overlap = mesh.overlap_mut();
    overlap.clear_dim(EntityDim::Vertex);
    for [local, rank, remote] in own.into_iter().chain(received.into_values().flatten()) {
        if local as usize >= n_vertices {
            return Err(MeshAdaptError::DistributedConsistency(format!(
                "rendezvous returned vertex {local}, but only {n_vertices} exist"
            )));
        }
        overlap.add_link(EntityDim::Vertex, local as usize, rank as usize, remote as usize);
    }
    log::debug!(
        "[rank {me}] {} of {n_vertices} vertices are shared",
        overlap.shared_count(EntityDim::Vertex)
    );
    Ok(())
}

/// Link shared edges and faces from the vertex links.
pub fn resolve_entity_sharing<C: Communicator>(
    mesh: &mut DistributedMesh,
    comm: &C,
) -> Result<(), MeshAdaptError> {
    const MAX_WIDTH: usize = 4;
    let neighbours = mesh.overlap().neighbours(EntityDim::Vertex);
    let dims: Vec<EntityDim> = mesh.dims().skip(1).take(mesh.dim() - 1).collect();

    for dim in dims {
        let width = mesh.table(dim)?.width();
        let mut outgoing: BTreeMap<usize, Vec<[u64; MAX_WIDTH + 1]>> = BTreeMap::new();
        for entity in 0..mesh.count(dim) {
            let verts = mesh.vertices(dim, entity);
            for rank in common_ranks(mesh.overlap(), verts) {
                let mut rec = [WIRE_NONE; MAX_WIDTH + 1];
                rec[0] = entity as u64;
                for (slot, &v) in rec[1..].iter_mut().zip(verts) {
                    let copy = mesh
                        .overlap()
                        .remotes(EntityDim::Vertex, v)
                        .iter()
                        .find(|r| r.rank == rank);
                    if let Some(copy) = copy {
                        *slot = copy.remote_index as u64;
                    }
                }
                outgoing.entry(rank).or_default().push(rec);
            }
        }

        let incoming = exchange_pod(comm, tags::ENTITY_CANDIDATES, &outgoing, &neighbours)?;
        let overlap_links: Vec<(usize, usize, usize)> = incoming
            .into_iter()
            .flat_map(|(nbr, recs)| recs.into_iter().map(move |rec| (nbr, rec)))
            .filter_map(|(nbr, rec)| {
                let verts: Vec<usize> = rec[1..=width].iter().map(|&v| v as usize).collect();
                mesh.find(dim, &verts).map(|local| (local, nbr, rec[0] as usize))
            })
            .collect();

        let overlap = mesh.overlap_mut();
        overlap.clear_dim(dim);
        for (local, nbr, remote) in overlap_links {
            overlap.add_link(dim, local, nbr, remote);
        }
        log::debug!(
            "[rank {}] {} {dim:?} entities are shared",
            comm.rank(),
            mesh.overlap().shared_count(dim)
        );
    }
    Ok(())
}

/// Ranks holding a copy of every vertex in `verts`.
fn common_ranks(overlap: &Overlap, verts: &[usize]) -> BTreeSet<usize> {
    let mut iter = verts.iter();
    let Some(&first) = iter.next() else {
        return BTreeSet::new();
    };
    let mut ranks: BTreeSet<usize> = overlap
        .remotes(EntityDim::Vertex, first)
        .iter()
        .map(|r| r.rank)
        .collect();
    for &v in iter {
        let here: BTreeSet<usize> = overlap
            .remotes(EntityDim::Vertex, v)
            .iter()
            .map(|r| r.rank)
            .collect();
        ranks.retain(|r| here.contains(r));
    }
    ranks
}

/// Give every copy of a shared entity the lowest classification any copy has.
///
/// Each copy may have derived a different classification from its local
/// containers; the agreed one is the minimum under [`Classification::lower`].
pub fn reduce_classification<C: Communicator>(
    mesh: &mut DistributedMesh,
    comm: &C,
) -> Result<(), MeshAdaptError> {
    let dims: Vec<EntityDim> = mesh.dims().take(mesh.dim()).collect();
    for dim in dims {
        let records = exchange_records(
            mesh.overlap(),
            dim,
            comm,
            tags::CLASSIFICATION,
            2,
            mesh.count(dim),
            |local, _, buf| {
                let class = mesh.classification(dim, local);
                buf.push(u64::from(class.dim));
                buf.push(i64::from(class.tag) as u64);
                true
            },
        )?;
        for r in records {
            let theirs = Classification {
                dim: r.words[0] as u8,
                tag: r.words[1] as i64 as i32,
            };
            let lowest = Classification::lower(Some(mesh.classification(dim, r.local)), theirs);
            mesh.set_classification(dim, r.local, lowest);
        }
    }
    Ok(())
}
