//! Stage 2 of an exchange: ship the record arrays announced in stage 1.

use std::collections::BTreeMap;

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{cast_slice, decode_records};
use crate::index_error::IndexError;

/// Send `outgoing[nbr]` to each neighbour and receive `expected[nbr]` records back.
///
/// Every neighbour in `outgoing` gets a message, even an empty one, so the
/// peer's receive always completes. Receives are posted only after all sends.
///
/// # Errors
/// - `BufferSizeMismatch` if a payload length differs from the announced count.
/// - `CommError` if a payload never arrives.
pub fn exchange_records<C, T>(
    outgoing: &BTreeMap<usize, &[T]>,
    expected: &BTreeMap<usize, usize>,
    comm: &C,
    tag: CommTag,
) -> Result<BTreeMap<usize, Vec<T>>, IndexError>
where
    C: Communicator,
    T: Pod,
{
    for &nbr in outgoing.keys().chain(expected.keys()) {
        comm.check_peer(nbr)?;
    }

    let mut pending_sends = Vec::with_capacity(outgoing.len());
    for (&nbr, records) in outgoing {
        pending_sends.push(comm.isend(nbr, tag.as_u16(), cast_slice(*records)));
    }

    let mut pending_recvs = Vec::with_capacity(expected.len());
    for (&nbr, &n_items) in expected {
        let mut buffer = vec![0u8; n_items * size_of::<T>()];
        let h = comm.irecv(nbr, tag.as_u16(), &mut buffer);
        pending_recvs.push((nbr, n_items, h));
    }

    let mut received = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, n_items, h) in pending_recvs {
        let outcome = match h.wait() {
            Some(raw) => decode_records::<T>(&raw, nbr, n_items),
            None => Err(IndexError::CommError {
                neighbor: nbr,
                message: format!("failed to receive {n_items} records from rank {nbr}"),
            }),
        };
        match outcome {
            Ok(records) => {
                received.insert(nbr, records);
            }
            Err(e) => {
                log::warn!("rank {}: data phase with rank {nbr} failed: {e}", comm.rank());
                maybe_err.get_or_insert(e);
            }
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(received),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;
    use crate::algs::wire::WireGlobal;

    #[test]
    fn records_are_delivered_per_neighbour() {
        let out = ThreadComm::run(2, |comm| {
            let me = comm.rank();
            let other = 1 - me;
            let mine = vec![WireGlobal::of(me as u64), WireGlobal::of(100 + me as u64)];
            let outgoing: BTreeMap<usize, &[WireGlobal]> = [(other, mine.as_slice())].into();
            let expected: BTreeMap<usize, usize> = [(other, 2)].into();
            exchange_records(&outgoing, &expected, &comm, CommTag::new(9)).unwrap()
        });
        let from_1: Vec<u64> = out[0][&1].iter().map(WireGlobal::get).collect();
        assert_eq!(from_1, vec![1, 101]);
        let from_0: Vec<u64> = out[1][&0].iter().map(WireGlobal::get).collect();
        assert_eq!(from_0, vec![0, 100]);
    }

    #[test]
    fn empty_payload_still_completes() {
        let out = ThreadComm::run(2, |comm| {
            let other = 1 - comm.rank();
            let outgoing: BTreeMap<usize, &[WireGlobal]> = [(other, &[][..])].into();
            let expected: BTreeMap<usize, usize> = [(other, 0)].into();
            exchange_records(&outgoing, &expected, &comm, CommTag::new(4)).unwrap()
        });
        assert!(out.iter().all(|m| m.values().all(Vec::is_empty)));
    }

    #[test]
    fn announced_count_must_match() {
        let world = ThreadComm::world(2);
        world[1].isend(0, 6, cast_slice(&[WireGlobal::of(1)]));
        let outgoing: BTreeMap<usize, &[WireGlobal]> = BTreeMap::new();
        let expected: BTreeMap<usize, usize> = [(1, 2)].into();
        let err = exchange_records(&outgoing, &expected, &world[0], CommTag::new(6)).unwrap_err();
        assert_eq!(
            err,
            IndexError::BufferSizeMismatch {
                neighbor: 1,
                expected: 16,
                got: 8
            }
        );
    }
}
