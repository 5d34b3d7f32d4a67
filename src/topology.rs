//! Recursive hypercube folding (spec.md §4.1).
//!
//! The number of rounds a rank participates in is a pure function of `size`
//! and that rank's position; it never depends on which mesh nodes are
//! actually shared, which is what makes the router's round count
//! `ceil(log2(P))`-ish regardless of exchange-graph density.

/// One round of the fold, from the point of view of a single rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Round {
    /// Rank this round primarily sends to / receives from.
    pub partner: i32,
    /// 0 (send-only, odd-parity self-pair), 1 (normal), or 2 (odd-parity
    /// rank receiving from both its reflected partner and `r_half - 1`).
    pub n_msg: u8,
    /// Second receive source when `n_msg == 2`, always `r_half - 1`.
    pub secondary: Option<i32>,
    /// Whether this rank is in the "lo" half of the current sub-cube.
    pub lo: bool,
    /// Split threshold for this round (`np_offset + np_half`), exposed so
    /// setup can partition nodes by `rank < r_half`.
    pub r_half: i32,
}

/// Computes every round this rank participates in until its sub-cube shrinks
/// to size 1. Exactly `ceil(log2(size))` rounds when `size` is a power of
/// two; at most one extra round otherwise, per the odd-parity corrections in
/// spec.md §4.1.
pub fn fold(size: i32, rank: i32) -> Vec<Round> {
    let mut rounds = Vec::new();
    let mut np = size;
    let mut np_offset = 0;

    while np > 1 {
        let np_half = (np + 1) / 2;
        let r_half = np_offset + np_half;
        let lo = rank < r_half;
        let odd = np % 2 == 1;

        let mut partner = np - 1 - (rank - np_offset) + np_offset;
        let mut n_msg: u8 = 1;
        let mut secondary = None;

        if odd && rank == r_half - 1 {
            // Middle rank of an odd split would pair with itself; redirect
            // to r_half and only send (spec.md §4.1).
            partner = r_half;
            n_msg = 0;
        } else if odd && rank == r_half {
            n_msg = 2;
            secondary = Some(r_half - 1);
        }

        rounds.push(Round {
            partner,
            n_msg,
            secondary,
            lo,
            r_half,
        });

        if lo {
            np = np_half;
        } else {
            np -= np_half;
            np_offset = r_half;
        }
    }

    rounds
}

/// `ceil(log2(size))`, the round-count law's power-of-two baseline
/// (spec.md §8 property 4).
pub fn expected_levels(size: i32) -> u32 {
    if size <= 1 {
        return 0;
    }
    (size as u32 - 1).ilog2() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_gives_exact_log2_rounds() {
        for size in [2, 4, 8, 16, 32] {
            for rank in 0..size {
                let rounds = fold(size, rank);
                assert_eq!(rounds.len() as u32, expected_levels(size));
            }
        }
    }

    #[test]
    fn odd_size_within_one_round_of_the_law() {
        for size in [3, 5, 7, 9, 11] {
            for rank in 0..size {
                let rounds = fold(size, rank);
                let expected = expected_levels(size);
                assert!(
                    rounds.len() as u32 <= expected + 1,
                    "size={size} rank={rank} got {} rounds, law allows <= {}",
                    rounds.len(),
                    expected + 1
                );
            }
        }
    }

    #[test]
    fn single_rank_has_no_rounds() {
        assert!(fold(1, 0).is_empty());
    }

    #[test]
    fn p3_matches_hand_traced_pairing() {
        // size=3: rank0<->rank2 primary, rank1 self-paired/redirected to
        // rank2 send-only, rank2 receives from both. Then ranks {0,1} do one
        // more round between themselves.
        let r0 = fold(3, 0);
        let r1 = fold(3, 1);
        let r2 = fold(3, 2);

        assert_eq!(r0.len(), 2);
        assert_eq!(r1.len(), 2);
        assert_eq!(r2.len(), 1);

        assert_eq!(r0[0].partner, 2);
        assert_eq!(r0[0].n_msg, 1);

        assert_eq!(r1[0].partner, 2);
        assert_eq!(r1[0].n_msg, 0);

        assert_eq!(r2[0].partner, 0);
        assert_eq!(r2[0].n_msg, 2);
        assert_eq!(r2[0].secondary, Some(1));

        assert_eq!(r0[1].partner, 1);
        assert_eq!(r1[1].partner, 0);
    }

    #[test]
    fn p2_single_round_mutual_partners() {
        let r0 = fold(2, 0);
        let r1 = fold(2, 1);
        assert_eq!(r0.len(), 1);
        assert_eq!(r1.len(), 1);
        assert_eq!(r0[0].partner, 1);
        assert_eq!(r1[0].partner, 0);
        assert_eq!(r0[0].n_msg, 1);
        assert_eq!(r1[0].n_msg, 1);
    }
}
