//! Double-buffered send/receive pool (spec.md §4.5).
//!
//! One send buffer and two receive buffers sized to the largest level seen
//! so far; `Finish` rotates which receive buffer is "current" via a parity
//! bit instead of reallocating every round.
use crate::config::RouterConfig;
use crate::error::{Result, RouterError};

#[derive(Debug)]
pub struct BufferPool {
    send: Vec<f64>,
    recv: [Vec<f64>; 2],
    buf_id: usize,
    n_send_max: usize,
    n_recv_max: usize,
    growth_factor: f64,
}

impl BufferPool {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            send: Vec::with_capacity(config.initial_capacity),
            recv: [
                Vec::with_capacity(config.initial_capacity),
                Vec::with_capacity(config.initial_capacity),
            ],
            buf_id: 0,
            n_send_max: 0,
            n_recv_max: 0,
            growth_factor: config.growth_factor,
        }
    }

    /// Ensures the pool can hold `n_send_max`/`n_recv_max` rows of `k`
    /// elements each. Growth-only: never shrinks an existing allocation.
    /// Resets `buf_id` to 0, since a reallocation invalidates whichever
    /// generation was "current".
    pub fn ensure_capacity(&mut self, n_send_max: usize, n_recv_max: usize, k: usize) -> Result<()> {
        let mut grew = false;

        if n_send_max > self.n_send_max {
            self.n_send_max = grow_target(self.n_send_max, n_send_max, self.growth_factor);
            grew = true;
        }
        if n_recv_max > self.n_recv_max {
            self.n_recv_max = grow_target(self.n_recv_max, n_recv_max, self.growth_factor);
            grew = true;
        }

        if grew {
            let send_elems = self
                .n_send_max
                .checked_mul(k)
                .ok_or_else(|| RouterError::Allocation("send buffer size overflow".into()))?;
            let recv_elems = self
                .n_recv_max
                .checked_mul(k)
                .ok_or_else(|| RouterError::Allocation("recv buffer size overflow".into()))?;

            self.send.resize(send_elems, 0.0);
            self.recv[0].resize(recv_elems, 0.0);
            self.recv[1].resize(recv_elems, 0.0);
            self.buf_id = 0;
        }
        Ok(())
    }

    pub fn send_buf(&mut self) -> &mut [f64] {
        &mut self.send
    }

    /// The receive buffer written as the *next* halo generation, while the
    /// other one (index `1 - buf_id`) still holds the previous one.
    pub fn next_recv(&mut self) -> &mut [f64] {
        &mut self.recv[1 - self.buf_id]
    }

    /// Flips which buffer is current, completing a round's rotation.
    pub fn swap(&mut self) {
        self.buf_id = 1 - self.buf_id;
    }

    pub fn n_send_max(&self) -> usize {
        self.n_send_max
    }

    pub fn n_recv_max(&self) -> usize {
        self.n_recv_max
    }
}

fn grow_target(current: usize, needed: usize, growth_factor: f64) -> usize {
    let grown = ((current as f64) * growth_factor).ceil() as usize;
    grown.max(needed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_monotonically_and_resets_buf_id() {
        let cfg = RouterConfig::default();
        let mut pool = BufferPool::new(&cfg);
        pool.ensure_capacity(4, 8, 2).unwrap();
        assert!(pool.n_send_max() >= 4);
        assert!(pool.n_recv_max() >= 8);

        pool.swap();
        pool.ensure_capacity(100, 8, 2).unwrap();
        assert_eq!(pool.n_send_max(), 100);
        // buf_id reset to 0 by the reallocation above, so `next_recv` (the
        // complement of `buf_id`) is recv[1] again, not recv[0].
        assert!(std::ptr::eq(pool.next_recv().as_ptr(), pool.recv[1].as_ptr()));
    }

    #[test]
    fn initial_capacity_is_reserved_up_front() {
        let cfg = RouterConfig {
            initial_capacity: 64,
            ..RouterConfig::default()
        };
        let pool = BufferPool::new(&cfg);
        assert!(pool.send.capacity() >= 64);
        assert!(pool.recv[0].capacity() >= 64);
        assert!(pool.recv[1].capacity() >= 64);
        // Reserving capacity up front doesn't change the reported bounds
        // until the first exchange actually asks for rows.
        assert_eq!(pool.n_send_max(), 0);
        assert_eq!(pool.n_recv_max(), 0);
    }

    #[test]
    fn shrinking_request_is_a_no_op() {
        let cfg = RouterConfig::default();
        let mut pool = BufferPool::new(&cfg);
        pool.ensure_capacity(10, 10, 1).unwrap();
        let before = pool.n_send_max();
        pool.ensure_capacity(2, 2, 1).unwrap();
        assert_eq!(pool.n_send_max(), before);
    }
}
