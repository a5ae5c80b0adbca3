//! Stage 1 of an exchange: swap one fixed-size header with each neighbour.
//!
//! All functions take a typed [`CommTag`] and guarantee that every send and
//! receive handle is drained before returning, even if an error occurs.

use std::collections::{BTreeMap, BTreeSet};

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, decode_records};
use crate::index_error::IndexError;

/// Send `header_for(nbr)` to every neighbour and receive one `H` from each.
///
/// Returns a map `nbr -> H` once all receives have completed.
///
/// # Errors
/// - whatever `header_for` returns, before anything is posted.
/// - `CommError` if a neighbour's header never arrives.
/// - `BufferSizeMismatch` if it arrives with the wrong length.
pub fn exchange_headers<C, H, F>(
    neighbors: &BTreeSet<usize>,
    header_for: F,
    comm: &C,
    tag: CommTag,
) -> Result<BTreeMap<usize, H>, IndexError>
where
    C: Communicator,
    H: Pod,
    F: Fn(usize) -> Result<H, IndexError>,
{
    // reject bad ranks and unencodable headers before anything is posted
    let mut send_bufs = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        comm.check_peer(nbr)?;
        send_bufs.push((nbr, header_for(nbr)?));
    }

    // 1) post all sends; buffers stay alive until completion
    let mut pending_sends = Vec::with_capacity(neighbors.len());
    for (nbr, header) in &send_bufs {
        pending_sends.push(comm.isend(
            *nbr,
            tag.as_u16(),
            cast_slice(std::slice::from_ref(header)),
        ));
    }

    // 2) post all receives
    let mut recv_hdr = Vec::with_capacity(neighbors.len());
    for &nbr in neighbors {
        let mut hdr = H::zeroed();
        let h = comm.irecv(nbr, tag.as_u16(), bytemuck::bytes_of_mut(&mut hdr));
        recv_hdr.push((nbr, h));
    }

    // 3) wait for all recvs, keep the first error but do not early-return
    let mut headers = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, h) in recv_hdr {
        match h.wait() {
            Some(data) => match decode_records::<H>(&data, nbr, 1) {
                Ok(mut one) if maybe_err.is_none() => {
                    headers.insert(nbr, one.remove(0));
                }
                Err(e) if maybe_err.is_none() => maybe_err = Some(e),
                _ => {}
            },
            None if maybe_err.is_none() => {
                maybe_err = Some(IndexError::CommError {
                    neighbor: nbr,
                    message: format!("failed to receive size header from rank {nbr}"),
                });
            }
            None => {}
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }
    drop(send_bufs);

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(headers),
    }
}

/// Exchange plain item counts: `counts[nbr]` goes out, the neighbour's count comes back.
/// Neighbours missing from `counts` are sent zero.
pub fn exchange_counts<C: Communicator>(
    neighbors: &BTreeSet<usize>,
    counts: &BTreeMap<usize, usize>,
    comm: &C,
    tag: CommTag,
) -> Result<BTreeMap<usize, usize>, IndexError> {
    let received = exchange_headers(
        neighbors,
        |nbr| WireCount::new(counts.get(&nbr).copied().unwrap_or(0), nbr),
        comm,
        tag,
    )?;
    Ok(received.into_iter().map(|(nbr, c)| (nbr, c.get())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;
    use std::time::Duration;

    #[test]
    fn counts_are_swapped_symmetrically() {
        let out = ThreadComm::run(3, |comm| {
            let me = comm.rank();
            let nbrs: BTreeSet<usize> = (0..3).filter(|&r| r != me).collect();
            let counts: BTreeMap<usize, usize> = nbrs.iter().map(|&n| (n, 10 * me + n)).collect();
            exchange_counts(&nbrs, &counts, &comm, CommTag::new(5)).unwrap()
        });
        // rank r receives from n what n computed for r: 10 * n + r
        for (r, got) in out.into_iter().enumerate() {
            for (n, c) in got {
                assert_eq!(c, 10 * n + r);
            }
        }
    }

    #[test]
    fn silent_neighbour_is_a_comm_error() {
        let world = ThreadComm::world_with_timeout(2, Duration::from_millis(20));
        let nbrs: BTreeSet<usize> = [1].into_iter().collect();
        let err = exchange_counts(&nbrs, &BTreeMap::new(), &world[0], CommTag::new(1)).unwrap_err();
        assert!(matches!(err, IndexError::CommError { neighbor: 1, .. }));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_count_fails_before_posting() {
        let world = ThreadComm::world_with_timeout(2, Duration::from_millis(20));
        let nbrs: BTreeSet<usize> = [1].into_iter().collect();
        let counts: BTreeMap<usize, usize> = [(1, u32::MAX as usize + 1)].into_iter().collect();
        let err = exchange_counts(&nbrs, &counts, &world[0], CommTag::new(3)).unwrap_err();
        assert!(matches!(err, IndexError::ProtocolError { neighbor: 1, .. }));
        // nothing reached rank 1
        assert_eq!(world[1].irecv(0, 3, &mut []).wait(), None);
    }

    #[test]
    fn short_header_is_a_size_mismatch() {
        let world = ThreadComm::world(2);
        world[1].isend(0, 2, &[1, 2]);
        let nbrs: BTreeSet<usize> = [1].into_iter().collect();
        let err = exchange_counts(&nbrs, &BTreeMap::new(), &world[0], CommTag::new(2)).unwrap_err();
        assert_eq!(
            err,
            IndexError::BufferSizeMismatch {
                neighbor: 1,
                expected: 4,
                got: 2
            }
        );
    }
}
