use index_exchange::algs::communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
use serial_test::serial;
use std::time::Duration;

#[test]
fn thread_round_trip() {
    let tag = CommTag::new(0x1000);
    let world = ThreadComm::world(2);

    let msg = b"hello";
    world[0].isend(1, tag.as_u16(), msg);

    let mut buf = [0u8; 5];
    let h = world[1].irecv(0, tag.as_u16(), &mut buf);
    let got = h.wait().unwrap();
    assert_eq!(&got, msg);
}

#[test]
fn thread_fifo_order() {
    let tag = CommTag::new(0x1001);
    let world = ThreadComm::world(2);

    for i in 0..10u8 {
        world[0].isend(1, tag.as_u16(), &[i]);
    }
    let mut out = Vec::new();
    for _ in 0..10 {
        let mut b = [0u8; 1];
        let h = world[1].irecv(0, tag.as_u16(), &mut b);
        out.push(h.wait().unwrap()[0]);
    }
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn separate_worlds_do_not_share_messages() {
    let a = ThreadComm::world_with_timeout(2, Duration::from_millis(20));
    let b = ThreadComm::world_with_timeout(2, Duration::from_millis(20));
    a[0].isend(1, 3, &[1]);
    assert_eq!(b[1].irecv(0, 3, &mut []).wait(), None);
    assert_eq!(a[1].irecv(0, 3, &mut []).wait(), Some(vec![1]));
}

#[test]
#[serial]
fn ring_exchange_over_threads() {
    let out = ThreadComm::run(4, |comm| {
        let me = comm.rank();
        let n = comm.size();
        let next = (me + 1) % n;
        let prev = (me + n - 1) % n;
        comm.isend(next, 5, &[me as u8]);
        let got = comm.irecv(prev, 5, &mut [0u8; 1]).wait().unwrap();
        comm.barrier().unwrap();
        got[0] as usize
    });
    assert_eq!(out, vec![3, 0, 1, 2]);
}

#[test]
fn no_comm_is_a_world_of_one() {
    let comm = NoComm;
    assert_eq!((comm.rank(), comm.size()), (0, 1));
    let mut all = [0u8; 2];
    comm.allgather(&[7, 9], &mut all).unwrap();
    assert_eq!(all, [7, 9]);
}

#[test]
#[serial]
fn collective_with_a_missing_rank_fails_on_the_others() {
    let world = ThreadComm::world_with_timeout(3, Duration::from_millis(50));
    // rank 2 never calls the barrier
    let out = ThreadComm::run_world(world, |comm| {
        if comm.rank() == 2 {
            return None;
        }
        Some(comm.barrier())
    });
    for res in out.into_iter().take(2) {
        assert!(matches!(
            res,
            Some(Err(index_exchange::index_error::IndexError::CommError { neighbor: 2, .. }))
        ));
    }
}

#[cfg(feature = "mpi-support")]
#[test]
fn mpi_send_handle_dropped_unwaited() {
    use index_exchange::algs::communicator::MpiComm;
    let world = MpiComm::new().unwrap();
    let me = world.rank();
    let n = world.size();
    let tx = [42u8, me as u8, 0, 0];
    // the handle completes the send and frees its buffer when dropped
    drop(world.isend((me + 1) % n, 0xCAFE, &tx));
    let got = world.irecv((me + n - 1) % n, 0xCAFE, &mut []).wait().unwrap();
    assert_eq!(got, [42u8, ((me + n - 1) % n) as u8, 0, 0]);
}
