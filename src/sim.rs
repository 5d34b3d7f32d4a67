//! In-process multi-rank simulation.
//!
//! [`SimComm`] gives every rank in a `cargo test` run a real [`Comm`]
//! backed by `crossbeam` channels instead of `mpirun`, the way
//! `iwlabpsi-preprocessing_mpsi_with_vole` simulates its multi-party
//! protocol over channels rather than a real network. One bounded-less
//! channel per directed `(from, to)` pair gives strict FIFO delivery for
//! that pair, which is all the router ever relies on — it never needs the
//! `tag` to disambiguate against other in-flight messages between the same
//! two ranks, since setup and exchange both already serialize their
//! send/receive pairs per round.
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::comm::{closed, Comm, PendingElems};
use crate::error::Result;
use crate::node::ParallelNode;

enum Wire {
    Usize(usize),
    Nodes(Vec<ParallelNode>),
    Elems(Vec<f64>),
}

/// One rank's endpoint into an in-process [`SimWorld`].
pub struct SimComm {
    rank: i32,
    size: i32,
    senders: Vec<Sender<Wire>>,
    receivers: Vec<Receiver<Wire>>,
}

/// Builds the full mesh of channels for `size` simulated ranks and returns
/// one [`SimComm`] per rank, ready to be moved into `size` OS threads.
pub fn build_world(size: i32) -> Vec<SimComm> {
    let size_u = size as usize;
    // channels[from][to]
    let mut senders: Vec<Vec<Sender<Wire>>> = Vec::with_capacity(size_u);
    let mut receivers: Vec<Vec<Option<Receiver<Wire>>>> = Vec::with_capacity(size_u);
    for _ in 0..size_u {
        senders.push(Vec::with_capacity(size_u));
        receivers.push(Vec::with_capacity(size_u));
    }
    for from in 0..size_u {
        for _to in 0..size_u {
            let (tx, rx) = crossbeam::channel::unbounded();
            senders[from].push(tx);
            receivers[from].push(Some(rx));
        }
    }

    let senders = Arc::new(senders);
    (0..size_u)
        .map(|rank| {
            let my_senders: Vec<Sender<Wire>> = (0..size_u).map(|to| senders[rank][to].clone()).collect();
            let my_receivers: Vec<Receiver<Wire>> = (0..size_u)
                .map(|from| receivers[from][rank].take().expect("receiver taken twice"))
                .collect();
            SimComm {
                rank: rank as i32,
                size,
                senders: my_senders,
                receivers: my_receivers,
            }
        })
        .collect()
}

impl Comm for SimComm {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.size
    }

    fn send_usize(&self, dest: i32, _tag: i32, val: usize) -> Result<()> {
        self.senders[dest as usize]
            .send(Wire::Usize(val))
            .map_err(|e| closed(e.to_string()))
    }

    fn recv_usize(&self, src: i32, _tag: i32) -> Result<usize> {
        match self.receivers[src as usize].recv() {
            Ok(Wire::Usize(v)) => Ok(v),
            Ok(_) => Err(closed("unexpected message kind, expected usize")),
            Err(e) => Err(closed(e.to_string())),
        }
    }

    fn send_nodes(&self, dest: i32, _tag: i32, nodes: &[ParallelNode]) -> Result<()> {
        self.senders[dest as usize]
            .send(Wire::Nodes(nodes.to_vec()))
            .map_err(|e| closed(e.to_string()))
    }

    fn recv_nodes(&self, src: i32, _tag: i32, count: usize) -> Result<Vec<ParallelNode>> {
        match self.receivers[src as usize].recv() {
            Ok(Wire::Nodes(v)) => {
                if v.len() != count {
                    return Err(closed(format!(
                        "node count mismatch: expected {count}, got {}",
                        v.len()
                    )));
                }
                Ok(v)
            }
            Ok(_) => Err(closed("unexpected message kind, expected nodes")),
            Err(e) => Err(closed(e.to_string())),
        }
    }

    fn send_elems(&self, dest: i32, _tag: i32, data: &[f64]) -> Result<()> {
        self.senders[dest as usize]
            .send(Wire::Elems(data.to_vec()))
            .map_err(|e| closed(e.to_string()))
    }

    fn post_recv_elems(&self, src: i32, _tag: i32, count: usize) -> Result<Box<dyn PendingElems>> {
        Ok(Box::new(SimPendingElems {
            receiver: self.receivers[src as usize].clone(),
            count,
        }))
    }
}

/// A posted-but-not-yet-waited-on receive for [`SimComm`]. Crossbeam's
/// unbounded channels never block a sender on a matching receiver, so unlike
/// `MpiComm` there's no deadlock to avoid here — "posting" just defers the
/// one blocking `recv()` call to `wait()`, for a uniform `Comm` interface.
struct SimPendingElems {
    receiver: Receiver<Wire>,
    count: usize,
}

impl PendingElems for SimPendingElems {
    fn wait(self: Box<Self>) -> Result<Vec<f64>> {
        match self.receiver.recv() {
            Ok(Wire::Elems(v)) => {
                if v.len() != self.count {
                    return Err(closed(format!(
                        "element count mismatch: expected {}, got {}",
                        self.count,
                        v.len()
                    )));
                }
                Ok(v)
            }
            Ok(_) => Err(closed("unexpected message kind, expected elements")),
            Err(e) => Err(closed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_count_between_two_ranks() {
        let mut world = build_world(2);
        let b = world.pop().unwrap();
        let a = world.pop().unwrap();

        let ta = std::thread::spawn(move || {
            a.send_usize(1, 0, 42).unwrap();
            a.recv_usize(1, 0).unwrap()
        });
        let tb = std::thread::spawn(move || {
            let got = b.recv_usize(0, 0).unwrap();
            b.send_usize(0, 0, got + 1).unwrap();
            got
        });

        let got_b = tb.join().unwrap();
        let got_a = ta.join().unwrap();
        assert_eq!(got_b, 42);
        assert_eq!(got_a, 43);
    }
}
