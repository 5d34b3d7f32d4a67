//! # crystal-router
//!
//! A crystal-router halo-exchange engine for distributed gather/scatter on
//! unstructured meshes. Given a set of globally shared mesh nodes partitioned
//! across `P` MPI ranks, [`Router`] reduces the partial value every rank
//! contributes for a shared node and delivers the combined value back to
//! every rank that participates in that node, in `ceil(log2(P))` rounds of
//! recursive hypercube folding.
//!
//! The heavy lifting is split the same way the underlying algorithm is split:
//! an internal `setup` pass builds, once per [`Router`], the per-level
//! [`level::Level`] descriptors for the "symmetric" (`Trans`) and
//! "non-symmetric" (`NoTrans`) exchange variants, and [`exchange`] drives the
//! steady-state `Start`/`Finish` pair over those descriptors for every
//! subsequent halo reduction.
//!
//! MPI traffic and device residency are both behind small seams
//! ([`comm::Comm`], [`platform::Platform`]) so the core algorithm never talks
//! to `mpi` or a GPU directly. This is what lets the crate's test suite
//! exercise the full protocol, across several simulated ranks, without an
//! `mpirun` in the loop — see [`sim::SimComm`].

pub mod buffer;
pub mod comm;
pub mod config;
pub mod error;
pub mod exchange;
pub mod gather;
pub mod level;
pub mod node;
pub mod platform;
pub mod router;
pub mod sim;
pub mod topology;

mod setup;

pub use comm::Comm;
pub use config::RouterConfig;
pub use error::{CommError, RouterError};
pub use gather::{DataType, Op, Trans};
pub use node::ParallelNode;
pub use platform::{HostPlatform, Platform, StreamHandle};
pub use router::Router;

/// Initialize process-wide tracing for applications embedding this crate.
///
/// Libraries should not usually install a subscriber themselves; this is a
/// convenience for the crate's own examples, mirroring how the surrounding
/// application would wire up `tracing_subscriber` once at startup.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}
