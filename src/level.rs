//! Per-round descriptor (spec.md §3 "Level descriptor", §4.2 step 9).
use crate::gather::GatherOperator;

/// Everything one round of the fold needs to replay during [`crate::exchange`],
/// for a single variant (N or T — `Router` keeps one `Vec<Level>` per
/// variant, built in lock-step during setup).
#[derive(Debug, Clone)]
pub struct Level {
    /// Rank this level's primary send/receive pairs with.
    pub partner: i32,
    /// Second receive source when `n_msg == 2`, always `r_half - 1`
    /// (mirrors `topology::Round::secondary`).
    pub secondary: Option<i32>,
    /// 0, 1, or 2 — mirrors `topology::Round::n_msg` for this level.
    pub n_msg: u8,
    /// Number of buffer rows extracted and sent to `partner` this round.
    pub n_send: usize,
    /// Positions (into the *current* halo/extended-halo buffer) to extract
    /// and pack into the send buffer, in order.
    pub send_ids: Vec<usize>,
    /// Rows received from `partner` this round.
    pub n_recv0: usize,
    /// Rows received from the secondary source (only when `n_msg == 2`).
    pub n_recv1: usize,
    /// Offset into the receive buffer where this round's arrivals start;
    /// `[0, recv_offset)` is the carried-forward previous generation.
    pub recv_offset: usize,
    /// Applies this level's contribution to the new halo generation.
    pub gather: GatherOperator,
}

impl Level {
    /// Total columns this level's gather is allowed to read:
    /// `recv_offset + n_recv0 + n_recv1`.
    pub fn n_cols(&self) -> usize {
        self.recv_offset + self.n_recv0 + self.n_recv1
    }
}
