//! Two-stage neighbour exchange: counts first, then payloads.
//!
//! Every function here posts all sends before waiting on any receive, waits on
//! every receive even after an error has been seen, and always drains all send
//! handles before returning. The receive buffers of the payload stage are sized
//! from the counts of the first stage, so backends that need an exact buffer
//! length (MPI) receive exactly what was sent.

use crate::algs::communicator::{CommTag, Communicator, Wait, tags};
use crate::algs::wire::{WireCount, cast_slice, decode_vec};
use crate::mesh_error::MeshAdaptError;
use bytemuck::Pod;
use std::collections::{BTreeMap, BTreeSet};

/// Every rank except the caller.
pub fn other_ranks<C: Communicator>(comm: &C) -> BTreeSet<usize> {
    (0..comm.size()).filter(|&r| r != comm.rank()).collect()
}

/// Exchange the number of records each neighbour should expect.
///
/// Returns `nbr → count` for every rank in `neighbors`.
pub fn exchange_counts<C: Communicator>(
    comm: &C,
    tag: CommTag,
    send_counts: &BTreeMap<usize, usize>,
    neighbors: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, usize>, MeshAdaptError> {
    // 1) post all sends and keep buffers alive until completion
    let mut pending_sends = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let wire = WireCount::new(send_counts.get(&nbr).copied().unwrap_or(0));
        pending_sends.push(comm.isend(nbr, tag.as_u16(), cast_slice(std::slice::from_ref(&wire))));
    }

    // 2) post all receives
    let mut recv_size = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let mut buf = [0u8; std::mem::size_of::<WireCount>()];
        recv_size.push((nbr, comm.irecv(nbr, tag.as_u16(), &mut buf)));
    }

    // 3) wait for all recvs, collect counts (but do not early-return)
    let mut sizes_in = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, h) in recv_size {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                let count: Vec<WireCount> = decode_vec(&data);
                sizes_in.insert(nbr, count[0].get());
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshAdaptError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected: std::mem::size_of::<WireCount>(),
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshAdaptError::CommError {
                    neighbor: nbr,
                    message: format!("failed to receive size from rank {nbr}"),
                });
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}

/// Send `outgoing[nbr]` to each neighbour and return what each neighbour sent.
///
/// Ranks in `neighbors` without an entry in `outgoing` receive an empty
/// message; the returned map has an entry (possibly empty) for every neighbour.
pub fn exchange_pod<T, C>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<T>>,
    neighbors: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, Vec<T>>, MeshAdaptError>
where
    T: Pod,
    C: Communicator,
{
    let send_counts: BTreeMap<usize, usize> =
        outgoing.iter().map(|(&nbr, v)| (nbr, v.len())).collect();
    let recv_counts = exchange_counts(comm, tag.sizes(), &send_counts, neighbors)?;

    let empty: Vec<T> = Vec::new();
    let mut pending_sends = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let payload = outgoing.get(&nbr).unwrap_or(&empty);
        pending_sends.push(comm.isend(nbr, tag.as_u16(), cast_slice(payload)));
    }

    let width = std::mem::size_of::<T>();
    let mut recv_data = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let n_bytes = recv_counts.get(&nbr).copied().unwrap_or(0) * width;
        let mut buffer = vec![0u8; n_bytes];
        let h = comm.irecv(nbr, tag.as_u16(), &mut buffer);
        recv_data.push((nbr, n_bytes, h));
    }

    let mut incoming = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, n_bytes, h) in recv_data {
        match h.wait() {
            Some(raw) if raw.len() == n_bytes => {
                incoming.insert(nbr, decode_vec::<T>(&raw));
            }
            Some(raw) if maybe_err.is_none() => {
                maybe_err = Some(MeshAdaptError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected: n_bytes,
                    got: raw.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshAdaptError::CommError {
                    neighbor: nbr,
                    message: "No data received (wait returned None)".into(),
                });
            }
            _ => {}
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}

/// Gather one value from every rank, indexed by rank.
pub fn all_gather<T, C>(comm: &C, tag: CommTag, value: T) -> Result<Vec<T>, MeshAdaptError>
where
    T: Pod,
    C: Communicator,
{
    let others = other_ranks(comm);
    let outgoing: BTreeMap<usize, Vec<T>> = others.iter().map(|&r| (r, vec![value])).collect();
    let incoming = exchange_pod(comm, tag, &outgoing, &others)?;

    let mut gathered = vec![value; comm.size()];
    for (nbr, values) in incoming {
        let v = values.first().copied().ok_or(MeshAdaptError::PartCountMismatch {
            neighbor: nbr,
            expected: 1,
            got: 0,
        })?;
        gathered[nbr] = v;
    }
    Ok(gathered)
}

/// Global sum of a per-rank `f64`.
pub fn all_reduce_sum<C: Communicator>(comm: &C, tag: CommTag, value: f64) -> Result<f64, MeshAdaptError> {
    Ok(all_gather(comm, tag, value)?.iter().sum())
}

/// Global sum of a per-rank count.
pub fn all_reduce_count<C: Communicator>(comm: &C, tag: CommTag, value: usize) -> Result<usize, MeshAdaptError> {
    let gathered = all_gather(comm, tag, value as u64)?;
    Ok(gathered.iter().map(|&v| v as usize).sum())
}

/// Collective: turn a local result into one every rank agrees on.
///
/// A rank whose own step failed keeps its error; the others fail with
/// [`MeshAdaptError::DistributedConsistency`] so that no rank goes on to the
/// next exchange alone.
pub fn agree<T, C: Communicator>(
    comm: &C,
    what: &str,
    local: Result<T, MeshAdaptError>,
) -> Result<T, MeshAdaptError> {
    let failed = all_reduce_count(comm, tags::AGREEMENT, usize::from(local.is_err()))?;
    match local {
        Ok(_) if failed > 0 => Err(MeshAdaptError::DistributedConsistency(format!(
            "{what} failed on {failed} other rank(s)"
        ))),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};
    use std::thread;

    const TAG: CommTag = CommTag::new(0x0700);

    #[test]
    fn serial_exchange_is_empty() {
        let out = exchange_pod::<u64, _>(&NoComm, TAG, &BTreeMap::new(), &BTreeSet::new()).unwrap();
        assert!(out.is_empty());
        assert_eq!(all_gather(&NoComm, TAG, 5u64).unwrap(), vec![5]);
    }

    #[test]
    fn three_rank_all_gather_and_sparse_exchange() {
        let handles: Vec<_> = LocalComm::world(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let me = comm.rank();
                    let gathered = all_gather(&comm, TAG, (me * 10) as u64).unwrap();
                    // each rank sends `me` copies of its rank to the next rank only
                    let next = (me + 1) % 3;
                    let prev = (me + 2) % 3;
                    let outgoing = BTreeMap::from([(next, vec![me as u64; me])]);
                    let neighbors = BTreeSet::from([next, prev]);
                    let incoming = exchange_pod(&comm, TAG.sizes().sizes(), &outgoing, &neighbors).unwrap();
                    (me, gathered, incoming)
                })
            })
            .collect();

        for h in handles {
            let (me, gathered, incoming) = h.join().unwrap();
            assert_eq!(gathered, vec![0, 10, 20]);
            let prev = (me + 2) % 3;
            assert_eq!(incoming[&prev], vec![prev as u64; prev]);
            assert!(incoming[&((me + 1) % 3)].is_empty());
        }
    }

    #[test]
    fn one_failing_rank_fails_every_rank() {
        let handles: Vec<_> = LocalComm::world(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let local = if comm.rank() == 1 {
                        Err(MeshAdaptError::Config("bad input".into()))
                    } else {
                        Ok(comm.rank())
                    };
                    let agreed = agree(&comm, "import", local);
                    // a later exchange still pairs up
                    let next = all_reduce_count(&comm, TAG, 1).unwrap();
                    (comm.rank(), agreed, next)
                })
            })
            .collect();

        for h in handles {
            let (rank, agreed, next) = h.join().unwrap();
            assert_eq!(next, 3);
            match agreed {
                Err(MeshAdaptError::Config(_)) => assert_eq!(rank, 1),
                Err(MeshAdaptError::DistributedConsistency(_)) => assert_ne!(rank, 1),
                other => panic!("rank {rank} got {other:?}"),
            }
        }
        assert_eq!(agree(&NoComm, "import", Ok(7)).unwrap(), 7);
    }
}
