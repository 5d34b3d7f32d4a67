//! Transport seam.
//!
//! [`Comm`] is the boundary between the router's algorithm (topology,
//! setup, exchange) and whatever actually moves bytes between ranks. The
//! production backend, [`MpiComm`], wraps the real `mpi` crate using the
//! non-blocking `immediate_send`/`Request`/`Scope` pattern; [`crate::sim::SimComm`]
//! stands in for it in tests so the whole router is exercised under plain
//! `cargo test`, without `mpirun`.
use crate::error::{CommError, Result, RouterError};
use crate::node::ParallelNode;

/// Point-to-point transport a [`crate::router::Router`] is built on.
///
/// `send_*`/`recv_*` are blocking from the caller's point of view. Element
/// payloads are the exception: `exchange.rs` posts a level's receive(s)
/// before issuing its own send, symmetrically on both communicating ranks
/// (spec.md §5), so [`Comm::post_recv_elems`] returns immediately with a
/// [`PendingElems`] handle instead of blocking — only `PendingElems::wait`,
/// called after the send, actually waits for the data. A blocking recv in
/// that slot would have both ranks stuck in their own `recv` before either
/// reached its own `send`.
pub trait Comm: Send + Sync {
    fn rank(&self) -> i32;
    fn size(&self) -> i32;

    fn send_usize(&self, dest: i32, tag: i32, val: usize) -> Result<()>;
    fn recv_usize(&self, src: i32, tag: i32) -> Result<usize>;

    fn send_nodes(&self, dest: i32, tag: i32, nodes: &[ParallelNode]) -> Result<()>;
    fn recv_nodes(&self, src: i32, tag: i32, count: usize) -> Result<Vec<ParallelNode>>;

    fn send_elems(&self, dest: i32, tag: i32, data: &[f64]) -> Result<()>;

    /// Posts a non-blocking receive for `count` elements from `src` and
    /// returns without waiting for the data to arrive.
    fn post_recv_elems(&self, src: i32, tag: i32, count: usize) -> Result<Box<dyn PendingElems>>;
}

/// A receive posted via [`Comm::post_recv_elems`], not yet waited on.
pub trait PendingElems: Send {
    fn wait(self: Box<Self>) -> Result<Vec<f64>>;
}

/// Tag namespace: setup and exchange both key messages by sender rank, with
/// `r_half - 1` as the secondary tag in the odd-parity two-message case
/// (spec.md §4.1/§4.2). Two disjoint bases keep setup's count/payload
/// traffic from ever colliding with an in-flight exchange's value traffic.
pub(crate) const TAG_SETUP_COUNT_BASE: i32 = 0;
pub(crate) const TAG_SETUP_NODES_BASE: i32 = 1_000_000;
pub(crate) const TAG_EXCHANGE_BASE: i32 = 2_000_000;

/// Real MPI backend, built on the `mpi` crate's non-blocking point-to-point
/// API (`Request`/`Scope`/`WaitGuard`) for typed, tagged send/receive.
pub struct MpiComm {
    world: mpi::topology::SystemCommunicator,
}

impl MpiComm {
    /// Wraps an already-initialized world communicator. Call sites own the
    /// `mpi::environment::Universe` for the process lifetime; this type only
    /// borrows the communicator it exposes.
    pub fn new(world: mpi::topology::SystemCommunicator) -> Self {
        Self { world }
    }
}

/// A [`Comm::post_recv_elems`] handle for [`MpiComm`]: the receive buffer and
/// its [`mpi::request::Request`] travel together since the request borrows
/// the buffer for as long as it's outstanding. `StaticScope` is what lets
/// that borrow outlive `post_recv_elems`'s own stack frame instead of being
/// confined to a `mpi::request::scope` closure.
struct MpiPendingElems {
    buf: Box<[f64]>,
    request: mpi::request::Request<'static, [f64], mpi::request::StaticScope>,
}

impl PendingElems for MpiPendingElems {
    fn wait(self: Box<Self>) -> Result<Vec<f64>> {
        self.request.wait();
        Ok(self.buf.into_vec())
    }
}

impl Comm for MpiComm {
    fn rank(&self) -> i32 {
        use mpi::topology::Communicator;
        self.world.rank()
    }

    fn size(&self) -> i32 {
        use mpi::topology::Communicator;
        self.world.size()
    }

    fn send_usize(&self, dest: i32, tag: i32, val: usize) -> Result<()> {
        use mpi::point_to_point::Destination;
        use mpi::request::{scope, WaitGuard};
        use mpi::topology::Communicator;
        let buf = [val as u64];
        scope(|scope| {
            let _req = WaitGuard::from(self.world.process_at_rank(dest).immediate_send_with_tag(scope, &buf[..], tag));
        });
        Ok(())
    }

    fn recv_usize(&self, src: i32, tag: i32) -> Result<usize> {
        use mpi::point_to_point::Source;
        use mpi::request::{scope, WaitGuard};
        use mpi::topology::Communicator;
        let mut buf = [0u64];
        scope(|scope| {
            let _req = WaitGuard::from(
                self.world
                    .process_at_rank(src)
                    .immediate_receive_into_with_tag(scope, &mut buf[..], tag),
            );
        });
        Ok(buf[0] as usize)
    }

    fn send_nodes(&self, dest: i32, tag: i32, nodes: &[ParallelNode]) -> Result<()> {
        use mpi::point_to_point::Destination;
        use mpi::request::{scope, WaitGuard};
        use mpi::topology::Communicator;
        let bytes: &[u8] = bytemuck::cast_slice(nodes);
        scope(|scope| {
            let _req = WaitGuard::from(self.world.process_at_rank(dest).immediate_send_with_tag(scope, bytes, tag));
        });
        Ok(())
    }

    fn recv_nodes(&self, src: i32, tag: i32, count: usize) -> Result<Vec<ParallelNode>> {
        use mpi::point_to_point::Source;
        use mpi::request::{scope, WaitGuard};
        use mpi::topology::Communicator;
        let mut nodes = vec![ParallelNode::new(0, 0, 0); count];
        {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut nodes);
            scope(|scope| {
                let _req = WaitGuard::from(
                    self.world
                        .process_at_rank(src)
                        .immediate_receive_into_with_tag(scope, bytes, tag),
                );
            });
        }
        Ok(nodes)
    }

    fn send_elems(&self, dest: i32, tag: i32, data: &[f64]) -> Result<()> {
        use mpi::point_to_point::Destination;
        use mpi::request::{scope, WaitGuard};
        use mpi::topology::Communicator;
        scope(|scope| {
            let _req = WaitGuard::from(self.world.process_at_rank(dest).immediate_send_with_tag(scope, data, tag));
        });
        Ok(())
    }

    fn post_recv_elems(&self, src: i32, tag: i32, count: usize) -> Result<Box<dyn PendingElems>> {
        use mpi::point_to_point::Source;
        use mpi::request::StaticScope;
        use mpi::topology::Communicator;
        let mut buf: Box<[f64]> = vec![0.0f64; count].into_boxed_slice();
        let request = self
            .world
            .process_at_rank(src)
            .immediate_receive_into_with_tag(StaticScope, &mut buf, tag);
        Ok(Box::new(MpiPendingElems { buf, request }))
    }
}

/// Maps a transport-level failure a `Comm` implementation can't recover
/// from into the crate's error type.
pub(crate) fn closed(msg: impl Into<String>) -> RouterError {
    RouterError::Comm(CommError::Closed(msg.into()))
}
