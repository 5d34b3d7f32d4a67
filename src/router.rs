//! Public entry point (spec.md §6 "External interfaces").
use tracing::{info_span, instrument};

use crate::buffer::BufferPool;
use crate::comm::Comm;
use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::exchange;
use crate::gather::{Op, Trans};
use crate::node::ParallelNode;
use crate::platform::{Platform, StreamHandle};
use crate::setup;

/// A constructed crystal router for one `gatherHalo` region.
///
/// Built once per mesh partitioning from the caller's `sharedNodes`; serves
/// arbitrarily many subsequent [`Router::start`]/[`Router::finish`] pairs
/// with any `k >= 1`, reusing its level descriptors (spec.md §3 lifecycle).
pub struct Router<C: Comm, P: Platform> {
    levels_n: Vec<crate::level::Level>,
    levels_t: Vec<crate::level::Level>,
    n_halo: usize,
    n_halo_p: usize,
    comm: C,
    platform: P,
    buffers: BufferPool,
    pending: bool,
    gpu_aware_mpi: bool,
    own_stream: StreamHandle,
}

impl<C: Comm, P: Platform> Router<C, P> {
    /// Builds the router from this rank's shared-node participations.
    ///
    /// `n_halo_p` is the positively-signed halo prefix size, `n_halo` the
    /// total halo size (`n_halo_p <= n_halo`); `shared_nodes` need not be
    /// sorted, and every entry's `new_id` must refer to a slot in
    /// `[0, n_halo)`.
    pub fn new(shared_nodes: &[ParallelNode], n_halo_p: usize, n_halo: usize, comm: C, platform: P) -> Result<Self> {
        Self::with_config(shared_nodes, n_halo_p, n_halo, comm, platform, RouterConfig::default())
    }

    pub fn with_config(
        shared_nodes: &[ParallelNode],
        n_halo_p: usize,
        n_halo: usize,
        comm: C,
        platform: P,
        config: RouterConfig,
    ) -> Result<Self> {
        config.validate()?;
        if n_halo_p > n_halo {
            return Err(RouterError::Contract(format!(
                "n_halo_p ({n_halo_p}) must not exceed n_halo ({n_halo})"
            )));
        }
        for n in shared_nodes {
            if n.new_id < 0 || n.new_id as usize >= n_halo {
                return Err(RouterError::Contract(format!(
                    "shared node new_id {} out of range [0, {n_halo})",
                    n.new_id
                )));
            }
        }

        let built = {
            let _span = info_span!("router.setup", rank = comm.rank(), size = comm.size()).entered();
            setup::run(&comm, n_halo, n_halo_p, shared_nodes)?
        };

        let own_stream = platform.new_stream();

        Ok(Self {
            levels_n: built.levels_n,
            levels_t: built.levels_t,
            n_halo,
            n_halo_p,
            comm,
            platform,
            buffers: BufferPool::new(&config),
            pending: false,
            gpu_aware_mpi: config.gpu_aware_mpi,
            own_stream,
        })
    }

    /// Number of hypercube-folding levels this rank participates in.
    pub fn n_levels(&self) -> usize {
        self.levels_t.len()
    }

    /// Total `NsendMax`/`NrecvMax` buffer sizing this router settled on
    /// (spec.md §8 property 5, "buffer-size law").
    pub fn buffer_bounds(&self) -> (usize, usize) {
        (self.buffers.n_send_max(), self.buffers.n_recv_max())
    }

    fn levels_for(&self, trans: Trans) -> &[crate::level::Level] {
        if trans.is_no_trans() {
            &self.levels_n
        } else {
            &self.levels_t
        }
    }

    /// Publishes `k` elements per halo slot into the host-visible send
    /// pipeline; never blocks on the network (spec.md §4.3).
    #[instrument(skip(self, device_halo, host_halo))]
    pub fn start(&mut self, device_halo: &[f64], host_halo: &mut [f64], k: usize, trans: Trans, host: bool) -> Result<()> {
        if self.pending {
            return Err(RouterError::Contract("start called while a previous exchange is still pending".into()));
        }
        let n = if trans.is_no_trans() { self.n_halo_p } else { self.n_halo };
        exchange::start(&self.platform, self.own_stream, device_halo, host_halo, k, n, host, self.gpu_aware_mpi)?;
        self.pending = true;
        Ok(())
    }

    /// Drives every level to completion, reducing `halo` in place
    /// (spec.md §4.4).
    #[instrument(skip(self, halo, device_halo))]
    pub fn finish(&mut self, halo: &mut Vec<f64>, device_halo: &mut [f64], k: usize, op: Op, trans: Trans, host: bool) -> Result<()> {
        if !self.pending {
            return Err(RouterError::Contract("finish called without a matching start".into()));
        }
        let levels = self.levels_for(trans);
        exchange::finish(
            &self.comm,
            &self.platform,
            self.own_stream,
            levels,
            halo,
            device_halo,
            &mut self.buffers,
            k,
            op,
            trans,
            host,
            self.gpu_aware_mpi,
        )?;
        self.pending = false;
        Ok(())
    }

    /// Convenience for the common host-resident case: stages nothing,
    /// drives `finish` directly on `halo`.
    pub fn exchange(&mut self, halo: &mut Vec<f64>, k: usize, op: Op, trans: Trans) -> Result<()> {
        self.start(&[], &mut [], k, trans, true)?;
        let mut unused = Vec::new();
        self.finish(halo, &mut unused, k, op, trans, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HostPlatform;
    use crate::sim::build_world;

    #[test]
    fn p2_two_shared_nodes_reduce_with_add() {
        let world = build_world(2);
        let mut handles = Vec::new();
        for (rank, comm) in world.into_iter().enumerate() {
            handles.push(std::thread::spawn(move || {
                let other = 1 - rank as i32;
                // Two globally shared nodes A, B; this rank owns both in
                // its own halo (n_halo = n_halo_p = 2) and the other rank
                // also contributes to both.
                let shared = vec![ParallelNode::new(other, 1, 0), ParallelNode::new(other, 2, 1)];
                let mut router = Router::new(&shared, 2, 2, comm, HostPlatform).unwrap();

                let mut halo = if rank == 0 { vec![1.0, 2.0] } else { vec![10.0, 20.0] };
                router.exchange(&mut halo, 1, Op::Add, Trans::Trans).unwrap();
                halo
            }));
        }
        for h in handles {
            let halo = h.join().unwrap();
            assert_eq!(&halo[..2], &[11.0, 22.0]);
        }
    }

    #[test]
    fn p1_is_a_no_op() {
        let world = build_world(1);
        let comm = world.into_iter().next().unwrap();
        let mut router = Router::new(&[], 1, 1, comm, HostPlatform).unwrap();
        assert_eq!(router.n_levels(), 0);

        let mut halo = vec![42.0];
        router.exchange(&mut halo, 1, Op::Add, Trans::Trans).unwrap();
        assert_eq!(halo, vec![42.0]);
    }
}
