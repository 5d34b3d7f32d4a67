//! The flat per-participation record setup threads through every round.

/// One shared-node participation on this rank.
///
/// `baseId`'s sign encodes the role this participation plays on this rank:
/// positive means it is counted by the non-symmetric (`NoTrans`) variant,
/// negative means it is a borrowed copy only visible to the symmetric
/// (`Trans`) variant. `sign` is a *separate* piece of state: it starts at
/// `±2` (mirroring `baseId`'s sign) and is then propagated, during setup
/// step 8, across every node sharing a base identity, so a positively-signed
/// contribution discovered on a peer becomes visible to copies that were
/// only ever seen as negative on this rank. Keeping `sign` distinct from the
/// sign of `baseId` is what lets that promotion happen without disturbing
/// the base identity itself.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelNode {
    /// Signed global shared-node identity. `magnitude = |base_id|` is the
    /// identity; the sign is the creation-time role (see above).
    pub base_id: i64,

    /// Local slot in the extended halo buffer. `-1` while unassigned
    /// in-flight between ranks.
    pub new_id: i64,

    /// Scratch slot used to restore pre-sort order after a re-labelling
    /// pass; meaningless outside of a single setup step.
    pub local_id: i64,

    /// Owning rank at time of record creation. Identifies a destination
    /// cube half during setup; never rewritten as the node migrates between
    /// ranks.
    pub rank: i32,

    /// Learned sign, initially `+2` or `-2`, promoted to positive across a
    /// base-id group once any member is known positive.
    pub sign: i32,
}

/// Sentinel for "not yet assigned a slot in the extended halo".
pub const UNASSIGNED: i64 = -1;

impl ParallelNode {
    pub fn new(rank: i32, base_id: i64, new_id: i64) -> Self {
        let sign = if base_id < 0 { -2 } else { 2 };
        Self {
            base_id,
            new_id,
            local_id: 0,
            rank,
            sign,
        }
    }

    /// Magnitude of `base_id`: the base identity shared across ranks.
    #[inline]
    pub fn base(&self) -> i64 {
        self.base_id.abs()
    }

    /// Whether this participation is positively signed at creation.
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.base_id >= 0
    }

    /// Whether the *learned* sign (post step-8 propagation) is positive.
    #[inline]
    pub fn has_positive_sign(&self) -> bool {
        self.sign > 0
    }

    #[inline]
    pub fn is_unassigned(&self) -> bool {
        self.new_id == UNASSIGNED
    }
}

// SAFETY: `ParallelNode` is `#[repr(C)]` with the three `i64` fields
// (base_id, new_id, local_id) ordered before the two `i32` fields (rank,
// sign): 24 bytes of naturally-aligned i64s followed by 8 bytes of
// naturally-aligned i32s is a tight 32-byte layout, a multiple of the
// struct's own 8-byte alignment, with no padding anywhere for
// `bytemuck::bytes_of`/`cast_slice` (comm.rs) to leak onto the wire. Field
// order matters here — i32 before i64 would force 4 bytes of padding after
// each i32 to satisfy the following i64's alignment.
unsafe impl bytemuck::Zeroable for ParallelNode {}
unsafe impl bytemuck::Pod for ParallelNode {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_base_from_signed_base_id() {
        let positive = ParallelNode::new(0, 42, 7);
        assert!(positive.is_positive());
        assert!(positive.has_positive_sign());
        assert_eq!(positive.base(), 42);

        let negative = ParallelNode::new(1, -42, 7);
        assert!(!negative.is_positive());
        assert!(!negative.has_positive_sign());
        assert_eq!(negative.base(), 42);
    }

    #[test]
    fn unassigned_sentinel() {
        let n = ParallelNode::new(0, 1, UNASSIGNED);
        assert!(n.is_unassigned());
    }

    #[test]
    fn pod_roundtrip_through_bytes() {
        let n = ParallelNode::new(3, -99, 12);
        let bytes = bytemuck::bytes_of(&n);
        let back: ParallelNode = *bytemuck::from_bytes(bytes);
        assert_eq!(n, back);
    }
}
