//! Metadata that identifies the remote copies of local entities.
//!
//! Every copy of a shared entity lists every other copy, so each rank can
//! decide ownership and exchange values without a third party.

use crate::topology::entity::EntityDim;
use std::collections::{BTreeMap, BTreeSet};

/// A copy of a local entity living on another rank.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Remote {
    pub rank: usize,
    pub remote_index: usize,
}

/// Sharing relationships between partitions, per entity dimension.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlap {
    links: BTreeMap<EntityDim, BTreeMap<usize, Vec<Remote>>>,
}

impl Overlap {
    /// Add a link `local --(rank, remote_index)-->`. Duplicate links are ignored.
    pub fn add_link(&mut self, dim: EntityDim, local: usize, remote_rank: usize, remote_index: usize) {
        let remote = Remote {
            rank: remote_rank,
            remote_index,
        };
        let copies = self.links.entry(dim).or_default().entry(local).or_default();
        if let Err(pos) = copies.binary_search(&remote) {
            copies.insert(pos, remote);
        }
    }

    /// Drop every link of dimension `dim`.
    pub fn clear_dim(&mut self, dim: EntityDim) {
        self.links.remove(&dim);
    }

    /// Remote copies of `local`, sorted by rank; empty if not shared.
    pub fn remotes(&self, dim: EntityDim, local: usize) -> &[Remote] {
        self.links
            .get(&dim)
            .and_then(|m| m.get(&local))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_shared(&self, dim: EntityDim, local: usize) -> bool {
        !self.remotes(dim, local).is_empty()
    }

    /// Lowest rank holding a copy of `local`, counting `my_rank` itself.
    pub fn owner(&self, dim: EntityDim, local: usize, my_rank: usize) -> usize {
        self.remotes(dim, local)
            .first()
            .map_or(my_rank, |r| r.rank.min(my_rank))
    }

    /// Shared entities of `dim` with their copies, in local order.
    pub fn shared(&self, dim: EntityDim) -> impl Iterator<Item = (usize, &[Remote])> + '_ {
        self.links
            .get(&dim)
            .into_iter()
            .flat_map(|m| m.iter().map(|(&local, copies)| (local, copies.as_slice())))
    }

    /// Ranks that share at least one entity of `dim` with this rank.
    pub fn neighbours(&self, dim: EntityDim) -> BTreeSet<usize> {
        self.shared(dim)
            .flat_map(|(_, copies)| copies.iter().map(|r| r.rank))
            .collect()
    }

    /// Ranks that share any entity with this rank.
    pub fn all_neighbours(&self) -> BTreeSet<usize> {
        self.links
            .keys()
            .flat_map(|&dim| self.neighbours(dim))
            .collect()
    }

    /// `(local, remote_index)` pairs shared with `nbr`, sorted by local index.
    pub fn links_to(&self, dim: EntityDim, nbr: usize) -> Vec<(usize, usize)> {
        self.shared(dim)
            .flat_map(|(local, copies)| {
                copies
                    .iter()
                    .filter(move |r| r.rank == nbr)
                    .map(move |r| (local, r.remote_index))
            })
            .collect()
    }

    /// Number of shared entities of `dim`.
    pub fn shared_count(&self, dim: EntityDim) -> usize {
        self.links.get(&dim).map_or(0, BTreeMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_are_sorted_and_deduplicated() {
        let mut ovlp = Overlap::default();
        ovlp.add_link(EntityDim::Vertex, 4, 2, 40);
        ovlp.add_link(EntityDim::Vertex, 4, 1, 14);
        ovlp.add_link(EntityDim::Vertex, 4, 2, 40);
        ovlp.add_link(EntityDim::Vertex, 1, 2, 10);

        let copies = ovlp.remotes(EntityDim::Vertex, 4);
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].rank, 1);
        assert_eq!(ovlp.owner(EntityDim::Vertex, 4, 0), 0);
        assert_eq!(ovlp.owner(EntityDim::Vertex, 4, 3), 1);
        assert_eq!(ovlp.owner(EntityDim::Vertex, 7, 3), 3);
        assert_eq!(ovlp.links_to(EntityDim::Vertex, 2), vec![(1, 10), (4, 40)]);
        assert_eq!(ovlp.neighbours(EntityDim::Vertex), BTreeSet::from([1, 2]));
        assert!(ovlp.neighbours(EntityDim::Edge).is_empty());
    }
}
