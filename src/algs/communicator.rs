//! Thin façade over in-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the exchange code calls
//! `.wait()` before it trusts that a buffer is ready, and drains every send
//! handle before returning.
//!
//! Backends:
//! - [`NoComm`]: a world of one rank, for serial use.
//! - [`ThreadComm`]: one rank per thread inside one process, sharing an
//!   explicitly created mailbox. Used by the test-suite.
//! - `MpiComm` (feature `mpi-support`).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::index_error::IndexError;

/// Typed message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `by` steps after this one, wrapping at `u16::MAX`.
    pub const fn offset(self, by: u16) -> Self {
        CommTag(self.0.wrapping_add(by))
    }
}

/// The two tags used by a size-then-data exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExchangeTags {
    pub sizes: CommTag,
    pub data: CommTag,
}

impl ExchangeTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            data: base.offset(1),
        }
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this process in the group.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive. `buf` gives the expected length; the payload itself is
    /// returned by [`Wait::wait`] and may differ in length, which callers check.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Every rank contributes `send` (same length everywhere); block `r` of
    /// `recv` receives rank `r`'s contribution.
    ///
    /// # Errors
    /// - `BufferSizeMismatch` if `recv` is not `size() * send.len()` bytes.
    /// - `CommError` if a rank's block is missing or has the wrong length.
    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), IndexError>;

    fn barrier(&self) -> Result<(), IndexError>;

    /// `isend` with a rank check.
    fn isend_result(
        &self,
        peer: usize,
        tag: u16,
        buf: &[u8],
    ) -> Result<Self::SendHandle, IndexError> {
        self.check_peer(peer)?;
        Ok(self.isend(peer, tag, buf))
    }

    /// `irecv` with a rank check.
    fn irecv_result(
        &self,
        peer: usize,
        tag: u16,
        buf: &mut [u8],
    ) -> Result<Self::RecvHandle, IndexError> {
        self.check_peer(peer)?;
        Ok(self.irecv(peer, tag, buf))
    }

    fn check_peer(&self, peer: usize) -> Result<(), IndexError> {
        if peer >= self.size() {
            return Err(IndexError::InvalidRank {
                rank: peer,
                size: self.size(),
            });
        }
        Ok(())
    }

    /// Length check shared by the `allgather` implementations.
    fn check_gather_len(&self, send: &[u8], recv: &[u8]) -> Result<(), IndexError> {
        let expected = send.len() * self.size();
        if recv.len() != expected {
            return Err(IndexError::BufferSizeMismatch {
                neighbor: self.rank(),
                expected,
                got: recv.len(),
            });
        }
        Ok(())
    }
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

/// Compile-time no-op comm for pure serial use: a world of exactly one rank.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), IndexError> {
        self.check_gather_len(send, recv)?;
        recv.copy_from_slice(send);
        Ok(())
    }
    fn barrier(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

// --- ThreadComm: one rank per thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// Tag reserved for the message-based collectives of [`ThreadComm`].
const COLLECTIVE_TAG: u16 = u16::MAX;

/// Default time a [`ThreadComm`] receive waits before giving up.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Mailbox {
    queues: Mutex<HashMap<Key, VecDeque<Bytes>>>,
    arrived: Condvar,
}

/// In-memory communicator: every rank of a world shares one mailbox.
///
/// Messages between a `(src, dst, tag)` triple are delivered in FIFO order.
/// A receive that sees no message within the timeout yields `None` from
/// `wait()`, which the exchange code reports as a communication error.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    timeout: Duration,
}

impl ThreadComm {
    /// Create the communicators of a world of `size` ranks.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        Self::world_with_timeout(size, DEFAULT_RECV_TIMEOUT)
    }

    pub fn world_with_timeout(size: usize, timeout: Duration) -> Vec<ThreadComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                timeout,
            })
            .collect()
    }

    /// Run `f` once per rank on its own scoped thread; results in rank order.
    /// A panic on any rank is propagated.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(ThreadComm) -> R + Sync,
        R: Send,
    {
        Self::run_world(Self::world(size), f)
    }

    /// Like [`run`](Self::run) for a world built by the caller.
    pub fn run_world<R, F>(world: Vec<ThreadComm>, f: F) -> Vec<R>
    where
        F: Fn(ThreadComm) -> R + Sync,
        R: Send,
    {
        let f = &f;
        std::thread::scope(|s| {
            let handles: Vec<_> = world
                .into_iter()
                .map(|comm| s.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    fn post(&self, dst: usize, tag: u16, buf: &[u8]) {
        let mut queues = self.mailbox.queues.lock();
        queues
            .entry((self.rank, dst, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
        self.mailbox.arrived.notify_all();
    }
}

/// Receive handle of [`ThreadComm`].
pub struct ThreadRecvHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    timeout: Duration,
}

impl Wait for ThreadRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut queues = self.mailbox.queues.lock();
        loop {
            if let Some(msg) = queues.get_mut(&self.key).and_then(VecDeque::pop_front) {
                return Some(msg.to_vec());
            }
            if self
                .mailbox
                .arrived
                .wait_until(&mut queues, deadline)
                .timed_out()
            {
                return queues
                    .get_mut(&self.key)
                    .and_then(VecDeque::pop_front)
                    .map(|msg| msg.to_vec());
            }
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = ThreadRecvHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.post(peer, tag, buf);
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> ThreadRecvHandle {
        ThreadRecvHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            timeout: self.timeout,
        }
    }

    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), IndexError> {
        self.check_gather_len(send, recv)?;
        let n = send.len();
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            self.post(peer, COLLECTIVE_TAG, send);
        }
        recv[self.rank * n..(self.rank + 1) * n].copy_from_slice(send);

        // every peer's block is awaited, the first failure is reported
        let mut maybe_err = None;
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            let h = self.irecv(peer, COLLECTIVE_TAG, &mut []);
            match h.wait() {
                Some(data) if data.len() == n => {
                    recv[peer * n..(peer + 1) * n].copy_from_slice(&data);
                }
                other => {
                    log::error!(
                        "rank {}: allgather block from rank {peer} missing or malformed ({:?} bytes)",
                        self.rank,
                        other.as_ref().map(Vec::len)
                    );
                    if maybe_err.is_none() {
                        maybe_err = Some(IndexError::CommError {
                            neighbor: peer,
                            message: match other {
                                Some(d) => format!("allgather block of {} bytes, expected {n}", d.len()),
                                None => "allgather block never arrived".into(),
                            },
                        });
                    }
                }
            }
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn barrier(&self) -> Result<(), IndexError> {
        self.allgather(&[], &mut [])
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::index_error::IndexError;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI communicator.
    ///
    /// Sends are immediate; receives complete inside `irecv`, so callers post
    /// all of their sends before their receives (the exchange code does).
    pub struct MpiComm {
        _universe: Option<Universe>,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// Initialize MPI and wrap the world communicator.
        pub fn new() -> Result<Self, IndexError> {
            let universe = mpi::initialize().ok_or_else(|| IndexError::CommError {
                neighbor: 0,
                message: "MPI is already initialized".into(),
            })?;
            let world = universe.world();
            let mut comm = Self::from_communicator(world);
            comm._universe = Some(universe);
            Ok(comm)
        }

        /// Wrap a communicator owned by an already initialized environment.
        pub fn from_communicator(world: SimpleCommunicator) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: None,
                world,
                rank,
                size,
            }
        }
    }

    /// Send handle owning its payload until the request completes.
    ///
    /// Dropping an unwaited handle waits for the send, then frees the buffer.
    pub struct MpiSendHandle {
        request: Option<Request<'static, [u8], StaticScope>>,
        buffer: *mut [u8],
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(req) = self.request.take() {
                req.wait();
            }
            // SAFETY: `buffer` came from `Box::leak` in `isend`, the request
            // borrowing it has completed above and `drop` runs once.
            unsafe { drop(Box::from_raw(self.buffer)) };
        }
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.request.take() {
                req.wait();
            }
            None
        }
    }

    pub struct MpiRecvHandle(Option<Vec<u8>>);

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let buffer: *mut [u8] = leaked;
            // SAFETY: the slice stays alive until the handle is dropped.
            let data: &'static [u8] = unsafe { &*buffer };
            let request = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                data,
                i32::from(tag),
            );
            MpiSendHandle {
                request: Some(request),
                buffer,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecvHandle {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(i32::from(tag));
            MpiRecvHandle(Some(data))
        }

        fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), IndexError> {
            self.check_gather_len(send, recv)?;
            self.world.all_gather_into(send, recv);
            Ok(())
        }

        fn barrier(&self) -> Result<(), IndexError> {
            self.world.barrier();
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
