//! Device/host staging seam (spec.md §4.7, "device/platform facade" —
//! another external collaborator named but not built by the spec).
//!
//! A real deployment would back this with a GPU-aware MPI build and an
//! actual async copy stream; [`HostPlatform`] is the no-op default that
//! makes the host-vs-device equivalence property (spec.md §8.7) trivially
//! true when `gpu_aware_mpi` is off, without depending on a GPU crate this
//! corpus never pulls in. [`StreamHandle`] exists so `Start`/`Finish` can
//! save and restore the caller's stream around their own work (spec.md §9).
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Opaque handle to whatever async copy stream a [`Platform`] uses to
/// overlap staging with communication. `0` is the reserved "default stream"
/// every [`Platform`] starts on; [`Platform::new_stream`] hands out distinct
/// handles above that for callers (one per [`crate::router::Router`]) that
/// want their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(u64);

impl StreamHandle {
    pub const DEFAULT: StreamHandle = StreamHandle(0);
}

impl Default for StreamHandle {
    fn default() -> Self {
        Self::DEFAULT
    }
}

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Host/device staging operations [`crate::exchange`] needs around every
/// send and receive when the transport is not GPU-aware.
pub trait Platform: Send + Sync {
    /// Copies `count * k` elements from a device-resident buffer into a
    /// host-resident one the transport can send from.
    fn stage_to_host(&self, device: &[f64], host: &mut [f64]) -> Result<()>;

    /// Copies `count * k` received elements from a host-resident buffer
    /// back onto the device.
    fn stage_to_device(&self, host: &[f64], device: &mut [f64]) -> Result<()>;

    /// Applies a [`crate::gather::GatherOperator`] directly on device-resident
    /// buffers, when the caller asked for a device-side extract/combine
    /// instead of staging through the host.
    fn extract_on_device(
        &self,
        gather: &crate::gather::GatherOperator,
        dst: &mut [f64],
        src: &[f64],
        k: usize,
        op: crate::gather::Op,
        trans: crate::gather::Trans,
    ) -> Result<()> {
        gather.gather(dst, src, k, op, trans)
    }

    /// Blocks until any in-flight staging copy on the current stream
    /// completes.
    fn sync_data_stream(&self) -> Result<()> {
        Ok(())
    }

    /// Hands out a fresh stream handle, distinct from every other one this
    /// platform has issued. A [`crate::router::Router`] calls this once at
    /// construction so its own `Start`/`Finish` work never runs on whatever
    /// stream the caller happened to be on.
    fn new_stream(&self) -> StreamHandle {
        StreamHandle(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The stream currently active on this platform.
    fn current_stream(&self) -> StreamHandle {
        StreamHandle::DEFAULT
    }

    /// Makes `stream` the active one. `Start`/`Finish` call this to switch
    /// onto the router's own stream and restore the caller's on the way out
    /// (spec.md §9, "Stream discipline"), so the two compose cleanly with
    /// whatever kernels the caller runs around them.
    fn set_stream(&self, stream: StreamHandle) {
        let _ = stream;
    }
}

/// No-op platform: "device" buffers are just host memory, so staging is a
/// plain copy and synchronization is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn stage_to_host(&self, device: &[f64], host: &mut [f64]) -> Result<()> {
        host.copy_from_slice(device);
        Ok(())
    }

    fn stage_to_device(&self, host: &[f64], device: &mut [f64]) -> Result<()> {
        device.copy_from_slice(host);
        Ok(())
    }
}
