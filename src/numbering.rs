//! Global and local numbering of mesh entities.
//!
//! For every entity dimension, [`NumberingTables::build`] computes
//! - a [`LocalNumbering`]: owned entities first, then ghosts, each in mesh
//!   order. Solver arrays are indexed by this ordinal.
//! - a [`GlobalNumbering`]: owned entities get `offset(rank) + owned ordinal`,
//!   where the offsets are a prefix sum of the all-gathered owned counts.
//!   Ghosts receive their id from the owning rank over the overlap links and
//!   never assign one themselves.
//!
//! Tables describe one topology only and are rebuilt after every adaptation.

use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::all_gather;
use crate::mesh::distributed::DistributedMesh;
use crate::mesh::sharing::exchange_records;
use crate::mesh_error::MeshAdaptError;
use crate::topology::entity::EntityDim;
use itertools::Itertools;
use std::collections::BTreeMap;

/// Local entity ↔ partition-local ordinal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalNumbering {
    ordinal_of: Vec<usize>,
    entity_at: Vec<usize>,
    owned: usize,
}

impl LocalNumbering {
    fn from_ownership(owned: impl Iterator<Item = usize>, ghosts: impl Iterator<Item = usize>, count: usize) -> Self {
        let mut entity_at: Vec<usize> = owned.collect();
        let n_owned = entity_at.len();
        entity_at.extend(ghosts);
        let mut ordinal_of = vec![0; count];
        for (ordinal, &entity) in entity_at.iter().enumerate() {
            ordinal_of[entity] = ordinal;
        }
        Self {
            ordinal_of,
            entity_at,
            owned: n_owned,
        }
    }

    /// Ordinal of a local entity.
    pub fn ordinal(&self, entity: usize) -> usize {
        self.ordinal_of[entity]
    }

    /// Entity at a given ordinal.
    pub fn entity(&self, ordinal: usize) -> usize {
        self.entity_at[ordinal]
    }

    /// Entities in ordinal order.
    pub fn order(&self) -> &[usize] {
        &self.entity_at
    }

    pub fn len(&self) -> usize {
        self.entity_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_at.is_empty()
    }

    pub fn owned_count(&self) -> usize {
        self.owned
    }
}

/// Local entity → globally unique id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlobalNumbering {
    ids: Vec<u64>,
    offset: u64,
    total: u64,
}

impl GlobalNumbering {
    pub fn id(&self, entity: usize) -> u64 {
        self.ids[entity]
    }

    /// Ids indexed by local entity.
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    /// First id owned by this rank.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of distinct entities over all ranks.
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct DimTables {
    local: LocalNumbering,
    global: GlobalNumbering,
    offsets: Vec<u64>,
}

/// Numbering of every entity dimension of one mesh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NumberingTables {
    tables: BTreeMap<EntityDim, DimTables>,
}

impl NumberingTables {
    /// Number every dimension of `mesh`. Collective.
    pub fn build<C: Communicator>(mesh: &DistributedMesh, comm: &C) -> Result<Self, MeshAdaptError> {
        let mut tables = BTreeMap::new();
        for dim in mesh.dims() {
            tables.insert(dim, build_dim(mesh, dim, comm)?);
        }
        log::debug!(
            "[rank {}] numbering built: {}",
            comm.rank(),
            tables
                .iter()
                .map(|(dim, t)| format!("{dim:?} {}/{}", t.local.owned_count(), t.global.total()))
                .join(", ")
        );
        Ok(Self { tables })
    }

    fn get(&self, dim: EntityDim) -> Result<&DimTables, MeshAdaptError> {
        self.tables.get(&dim).ok_or(MeshAdaptError::MissingDimension(dim))
    }

    pub fn local(&self, dim: EntityDim) -> Result<&LocalNumbering, MeshAdaptError> {
        Ok(&self.get(dim)?.local)
    }

    pub fn global(&self, dim: EntityDim) -> Result<&GlobalNumbering, MeshAdaptError> {
        Ok(&self.get(dim)?.global)
    }

    /// Entities of `dim` owned by this rank.
    pub fn owned_count(&self, dim: EntityDim) -> Result<usize, MeshAdaptError> {
        Ok(self.get(dim)?.local.owned_count())
    }

    /// Owned-range offsets of every rank, `size + 1` entries.
    pub fn offsets(&self, dim: EntityDim) -> Result<&[u64], MeshAdaptError> {
        Ok(&self.get(dim)?.offsets)
    }

    /// Global id of the entity at local `ordinal`.
    pub fn global_of_ordinal(&self, dim: EntityDim, ordinal: usize) -> Result<u64, MeshAdaptError> {
        let t = self.get(dim)?;
        Ok(t.global.id(t.local.entity(ordinal)))
    }
}

fn build_dim<C: Communicator>(
    mesh: &DistributedMesh,
    dim: EntityDim,
    comm: &C,
) -> Result<DimTables, MeshAdaptError> {
    let me = comm.rank();
    let count = mesh.count(dim);
    let ownership = mesh.ownership(dim)?;
    let local = LocalNumbering::from_ownership(ownership.owned(), ownership.ghosts(), count);

    let counts = all_gather(comm, tags::ALL_GATHER, local.owned_count() as u64)?;
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    let mut running = 0u64;
    offsets.push(0);
    for c in &counts {
        running += c;
        offsets.push(running);
    }
    let offset = offsets[me];

    let mut ids: Vec<Option<u64>> = vec![None; count];
    for (ordinal, &entity) in local.order()[..local.owned_count()].iter().enumerate() {
        ids[entity] = Some(offset + ordinal as u64);
    }

    let overlap = mesh.overlap();
    let records = exchange_records(overlap, dim, comm, tags::GLOBAL_IDS, 1, count, |entity, _, buf| {
        match ids[entity] {
            Some(id) if !ownership.is_ghost(entity) => {
                buf.push(id);
                true
            }
            _ => false,
        }
    })?;
    for r in records {
        if !ownership.is_ghost(r.local) {
            return Err(MeshAdaptError::DistributedConsistency(format!(
                "rank {} sent a global id for {dim:?} {} owned by rank {me}",
                r.from, r.local
            )));
        }
        ids[r.local] = Some(r.words[0]);
    }

    let ids = ids
        .into_iter()
        .enumerate()
        .map(|(entity, id)| {
            id.ok_or_else(|| {
                MeshAdaptError::DistributedConsistency(format!(
                    "ghost {dim:?} {entity} on rank {me} received no global id"
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DimTables {
        local,
        global: GlobalNumbering {
            ids,
            offset,
            total: running,
        },
        offsets,
    })
}
