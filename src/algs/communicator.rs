//! Thin façade over in-process (thread-per-rank) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! Every exchange in this crate posts all of its sends before it waits on any
//! receive, and drains every send handle before returning, so a backend only
//! has to guarantee that `isend` never blocks on the matching receive.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Typed message tag; each collective in the crate uses its own tag.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag used for the size header that precedes a payload sent with `self`.
    pub const fn sizes(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Tags reserved by the driver's collectives. Sizes use `tag + 1`.
pub mod tags {
    use super::CommTag;

    pub const ALL_GATHER: CommTag = CommTag::new(0x0100);
    pub const AGREEMENT: CommTag = CommTag::new(0x0102);
    pub const VERTEX_RENDEZVOUS: CommTag = CommTag::new(0x0110);
    pub const VERTEX_COPIES: CommTag = CommTag::new(0x0112);
    pub const ENTITY_CANDIDATES: CommTag = CommTag::new(0x0120);
    pub const CLASSIFICATION: CommTag = CommTag::new(0x0122);
    pub const GLOBAL_IDS: CommTag = CommTag::new(0x0130);
    pub const SIZE_FIELD: CommTag = CommTag::new(0x0140);
    pub const SMOOTHING: CommTag = CommTag::new(0x0142);
    pub const RECOVERY: CommTag = CommTag::new(0x0144);
    pub const SPLIT_MARKS: CommTag = CommTag::new(0x0150);
    pub const SPLIT_VERTICES: CommTag = CommTag::new(0x0152);
}

/// Point-to-point communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send; must not block until the peer receives.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of `buf.len()` bytes; the data is returned by `wait`.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;
    /// This process's rank.
    fn rank(&self) -> usize;
    /// Number of ranks in the communicator.
    fn size(&self) -> usize;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for serial runs: rank 0 of 1.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }
}

// --- LocalComm: in-process, one thread per rank ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// Receive handle of [`LocalComm`]; `wait` spins until the message arrives.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

/// In-process communicator: every endpoint created by [`LocalComm::world`]
/// shares one mailbox, so each rank can run on its own thread.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Create `size` connected endpoints, ranks `0..size`.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::new());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::mesh_error::MeshAdaptError;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI communicator over `MPI_COMM_WORLD`.
    ///
    /// Sends are buffered (`MPI_Bsend`) so posting them never waits for the
    /// peer; receives complete eagerly when posted.
    pub struct MpiComm {
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// Initialise MPI and attach a send buffer of `buffer_bytes`.
        pub fn new(buffer_bytes: usize) -> Result<Self, MeshAdaptError> {
            let mut universe = mpi::initialize()
                .ok_or_else(|| MeshAdaptError::Config("MPI has already been initialised".into()))?;
            universe.set_buffer_size(buffer_bytes);
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    /// Completed receive.
    pub struct MpiRecv(Vec<u8>);

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            Some(self.0)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecv;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .buffered_send_with_tag(buf, i32::from(tag));
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecv {
            let mut data = vec![0u8; buf.len()];
            self.world
                .process_at_rank(peer as i32)
                .receive_into_with_tag(&mut data[..], i32::from(tag));
            MpiRecv(data)
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
