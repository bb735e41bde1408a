//! Ownership metadata for the entities of one dimension.
//!
//! The [`EntityOwnership`] map records the owning rank and whether an entity is
//! a ghost on the current rank. Ownership goes to the lowest rank holding a
//! copy, so every rank reaches the same answer from its own overlap links.

use crate::mesh_error::MeshAdaptError;
use crate::overlap::overlap::Overlap;
use crate::topology::entity::EntityDim;

#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OwnershipEntry {
    pub owner: usize,
    pub is_ghost: bool,
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct EntityOwnership {
    entries: Vec<OwnershipEntry>,
}

impl EntityOwnership {
    /// Every entity owned by `my_rank`.
    pub fn all_owned(count: usize, my_rank: usize) -> Self {
        Self {
            entries: vec![
                OwnershipEntry {
                    owner: my_rank,
                    is_ghost: false,
                };
                count
            ],
        }
    }

    /// Resolve ownership of `count` entities of `dim` from the overlap links.
    pub fn from_overlap(overlap: &Overlap, dim: EntityDim, count: usize, my_rank: usize) -> Self {
        let mut ownership = Self::all_owned(count, my_rank);
        for (local, copies) in overlap.shared(dim) {
            for copy in copies {
                ownership.set_owner_min(local, copy.rank, my_rank);
            }
        }
        ownership
    }

    /// Returns the number of tracked entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Update an entry, keeping the smallest owner when repeated.
    pub fn set_owner_min(&mut self, entity: usize, owner: usize, my_rank: usize) {
        if entity >= self.entries.len() {
            self.entries.resize(
                entity + 1,
                OwnershipEntry {
                    owner: my_rank,
                    is_ghost: false,
                },
            );
        }
        let updated_owner = self.entries[entity].owner.min(owner);
        self.entries[entity] = OwnershipEntry {
            owner: updated_owner,
            is_ghost: updated_owner != my_rank,
        };
    }

    pub fn entry(&self, entity: usize) -> Option<OwnershipEntry> {
        self.entries.get(entity).copied()
    }

    /// Retrieve the owning rank or return an error if `entity` is unknown.
    pub fn owner_or_err(&self, dim: EntityDim, entity: usize) -> Result<usize, MeshAdaptError> {
        self.entry(entity)
            .map(|e| e.owner)
            .ok_or_else(|| MeshAdaptError::TopologyMismatch(format!("{dim:?} {entity} has no ownership entry")))
    }

    pub fn is_ghost(&self, entity: usize) -> bool {
        self.entry(entity).is_some_and(|e| e.is_ghost)
    }

    /// Owned entities in local order.
    pub fn owned(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, e)| (!e.is_ghost).then_some(idx))
    }

    /// Ghost entities in local order.
    pub fn ghosts(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, e)| e.is_ghost.then_some(idx))
    }

    pub fn owned_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_ghost).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_rank_owns() {
        let mut ovlp = Overlap::default();
        ovlp.add_link(EntityDim::Vertex, 1, 0, 7);
        ovlp.add_link(EntityDim::Vertex, 2, 3, 9);
        let own = EntityOwnership::from_overlap(&ovlp, EntityDim::Vertex, 4, 1);
        assert_eq!(own.owned().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert_eq!(own.ghosts().collect::<Vec<_>>(), vec![1]);
        assert_eq!(own.owner_or_err(EntityDim::Vertex, 1).unwrap(), 0);
        assert!(own.owner_or_err(EntityDim::Vertex, 9).is_err());
    }
}
