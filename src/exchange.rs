//! Steady-state Start/Finish pair (spec.md §4.3-4.4).
//!
//! `Start` is staging-only and never touches the network; `Finish` drives
//! every level in order, posting the primary receive (and the odd-parity
//! secondary one), packing and sending this rank's contribution, then
//! folding the arrivals back into the halo via the level's gather
//! descriptor.
//!
//! The wire protocol keeps one real MPI message per level per direction
//! (spec.md §6): tags are the sender's own rank, offset into a dedicated
//! exchange tag band so they can never collide with setup's traffic.
//!
//! Each round builds an explicit source array (carried-forward prefix plus
//! freshly received rows) in a scratch buffer rather than receiving
//! straight into the rotating halo in place: `GatherOperator::gather` takes
//! distinct `&mut dst` / `&src` slices, and Rust's borrow rules already
//! forbid aliasing them, so a dedicated scratch buffer is the natural
//! implementation rather than an optimization given up. Functionally
//! identical output, one extra copy per level; documented in DESIGN.md.
//!
//! Both functions save the caller's current stream and restore it before
//! returning, switching onto the router's own stream for their own work
//! (spec.md §9, "Stream discipline") — so a caller that's mid-kernel on its
//! own stream sees no difference in what stream is active across a
//! `Start`/`Finish` pair.
use crate::buffer::BufferPool;
use crate::comm::{Comm, TAG_EXCHANGE_BASE};
use crate::error::{Result, RouterError};
use crate::gather::{Op, Trans};
use crate::level::Level;
use crate::platform::{Platform, StreamHandle};

/// Copies the caller's data onto the host-visible staging path. Never
/// issues network traffic; `Finish` is what actually drives the exchange.
///
/// Staging is skipped entirely when `gpu_aware_mpi` is set and the caller
/// isn't host-resident already: the transport reads straight from device
/// memory instead (spec.md §4.3, §4.4 step 3b).
pub(crate) fn start(
    platform: &dyn Platform,
    own_stream: StreamHandle,
    device_halo: &[f64],
    host_halo: &mut [f64],
    k: usize,
    n: usize,
    host: bool,
    gpu_aware_mpi: bool,
) -> Result<()> {
    let caller_stream = platform.current_stream();
    platform.set_stream(own_stream);

    let result = (|| -> Result<()> {
        if !host && !gpu_aware_mpi {
            platform.stage_to_host(&device_halo[..n * k], &mut host_halo[..n * k])?;
        }
        Ok(())
    })();

    platform.set_stream(caller_stream);
    result
}

/// Drives every level to completion, reducing `halo` in place.
///
/// `halo` is grown (never shrunk) to `levels.last().gather.n_rows * k` as
/// the rounds proceed; its prefix always holds the live, caller-visible
/// values for slots already assigned. When `gpu_aware_mpi` is set and the
/// exchange isn't host-resident, the gather runs directly against
/// `device_halo` via [`crate::platform::Platform::extract_on_device`]
/// instead of staging through `halo`.
pub(crate) fn finish(
    comm: &dyn Comm,
    platform: &dyn Platform,
    own_stream: StreamHandle,
    levels: &[Level],
    halo: &mut Vec<f64>,
    device_halo: &mut [f64],
    buffers: &mut BufferPool,
    k: usize,
    op: Op,
    trans: Trans,
    host: bool,
    gpu_aware_mpi: bool,
) -> Result<()> {
    let caller_stream = platform.current_stream();
    platform.set_stream(own_stream);

    let result = finish_inner(comm, platform, levels, halo, device_halo, buffers, k, op, trans, host, gpu_aware_mpi);

    platform.set_stream(caller_stream);
    result
}

#[allow(clippy::too_many_arguments)]
fn finish_inner(
    comm: &dyn Comm,
    platform: &dyn Platform,
    levels: &[Level],
    halo: &mut Vec<f64>,
    device_halo: &mut [f64],
    buffers: &mut BufferPool,
    k: usize,
    op: Op,
    trans: Trans,
    host: bool,
    gpu_aware_mpi: bool,
) -> Result<()> {
    let rank = comm.rank();
    let device_resident = !host && gpu_aware_mpi;

    for level in levels {
        let n_cols = level.n_cols();
        buffers.ensure_capacity(level.n_send, n_cols, k)?;

        // Pack the send buffer from the *current* (pre-update) halo before
        // anything this round overwrites it.
        {
            let source: &[f64] = if device_resident { &device_halo[..] } else { &halo[..] };
            let send_buf = buffers.send_buf();
            for (row, &slot) in level.send_ids.iter().enumerate() {
                send_buf[row * k..(row + 1) * k].copy_from_slice(&source[slot * k..(slot + 1) * k]);
            }
        }

        // Build this round's unified source: carried-forward prefix...
        {
            let source: &[f64] = if device_resident { &device_halo[..] } else { &halo[..] };
            let prefix_len = level.recv_offset * k;
            let scratch = buffers.next_recv();
            scratch[..prefix_len].copy_from_slice(&source[..prefix_len]);
        }

        // ...post the primary receive, tagged with the partner's own rank...
        let pending0 = if level.n_msg >= 1 {
            Some(comm.post_recv_elems(level.partner, TAG_EXCHANGE_BASE + level.partner, level.n_recv0 * k)?)
        } else {
            None
        };
        // ...and the odd-parity secondary receive, tagged with its sender...
        let pending1 = if level.n_msg == 2 {
            let secondary = level.secondary.expect("n_msg == 2 always carries a secondary source");
            Some(comm.post_recv_elems(secondary, TAG_EXCHANGE_BASE + secondary, level.n_recv1 * k)?)
        } else {
            None
        };

        // Send this rank's contribution, tagged with this rank's own id.
        // Posting both receives above before this send is what spec.md §5's
        // per-level ordering requires; because the receives are posted
        // non-blockingly, this send can proceed even though the partner's
        // matching send hasn't happened yet, instead of both ranks
        // deadlocking in their own blocking recv first.
        comm.send_elems(level.partner, TAG_EXCHANGE_BASE + rank, &buffers.send_buf()[..level.n_send * k])?;

        if let Some(pending) = pending0 {
            let data = pending.wait()?;
            let scratch = buffers.next_recv();
            let start = level.recv_offset * k;
            scratch[start..start + data.len()].copy_from_slice(&data);
        }
        if let Some(pending) = pending1 {
            let data = pending.wait()?;
            let scratch = buffers.next_recv();
            let start = (level.recv_offset + level.n_recv0) * k;
            scratch[start..start + data.len()].copy_from_slice(&data);
        }

        if device_resident {
            let needed = level.gather.n_rows * k;
            if needed > device_halo.len() {
                return Err(RouterError::Contract(format!(
                    "device-resident halo buffer too small: need {needed} elements, have {}",
                    device_halo.len()
                )));
            }
            platform.extract_on_device(&level.gather, device_halo, buffers.next_recv(), k, op, trans)?;
        } else {
            halo.resize(level.gather.n_rows * k, 0.0);
            level.gather.gather(halo, buffers.next_recv(), k, op, trans)?;
        }
        buffers.swap();
    }

    // spec.md §4.4 step 4 only requires the NhaloP- or Nhalo-prefix to land
    // back on device depending on `trans`; copying the whole (already-grown)
    // halo back is a superset of that and spares Finish from threading
    // NhaloP through just for this last copy. Not needed at all when the
    // exchange was already device-resident throughout.
    if !host && !gpu_aware_mpi {
        let n = halo.len().min(device_halo.len());
        platform.stage_to_device(&halo[..n], &mut device_halo[..n])?;
        platform.sync_data_stream()?;
    } else if device_resident {
        platform.sync_data_stream()?;
    }

    Ok(())
}
