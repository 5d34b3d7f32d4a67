//! Error types.
//!
//! Per the design, a crystal router is fail-fast: MPI transport failures and
//! allocation failures abort the process the way any collective HPC code
//! does, and most contract violations (mismatched `Nshared` across ranks,
//! inconsistent `gatherHalo` sizes) are simply undefined behavior upstream.
//! [`RouterError`] only covers the handful of cases a single rank can detect
//! cheaply and locally, without a collective check: bad construction
//! arguments and the few `Comm`/allocation failures the seams can surface as
//! a `Result` instead of a panic or abort.

/// Errors that can be detected and reported without a collective check.
#[derive(thiserror::Error, Debug)]
pub enum RouterError {
    #[error("communication error: {0}")]
    Comm(#[from] CommError),

    #[error("allocation failure: {0}")]
    Allocation(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("contract violation: {0}")]
    Contract(String),
}

/// Errors surfaced by a [`crate::comm::Comm`] implementation.
///
/// Real MPI failures are not expected to be recoverable — both backends
/// (`MpiComm`, `SimComm`) only report a transport as `Closed`: the peer's
/// channel/communicator is gone and the in-flight send/receive can't
/// complete.
#[derive(thiserror::Error, Debug)]
pub enum CommError {
    #[error("transport closed unexpectedly: {0}")]
    Closed(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;
