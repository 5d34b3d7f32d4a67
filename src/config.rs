//! Router configuration.
//!
//! A [`Router`](crate::Router) is almost always constructed programmatically
//! by the surrounding gather/scatter object, so [`RouterConfig::default`] is
//! the primary path. [`RouterConfig::from_file`] is kept around for the rare
//! deployment that wants to tune staging behavior from a TOML file without a
//! recompile, the way the rest of the corpus layers the `config` crate on
//! top of a plain `serde`-derived settings struct.
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};

/// Tunables for the buffer pool and device staging path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Whether the MPI implementation can send/receive directly from device
    /// pointers. When `false`, [`crate::exchange`] stages through
    /// [`crate::platform::Platform`] host shadow buffers instead.
    pub gpu_aware_mpi: bool,

    /// Growth factor applied when [`crate::buffer::BufferPool`] reallocates;
    /// must be `> 1.0` so repeated small growths don't thrash allocations.
    pub growth_factor: f64,

    /// Elements of heap capacity [`crate::buffer::BufferPool`] reserves up
    /// front, before any exchange has run, to avoid a reallocation on the
    /// first `ensure_capacity` call. Does not change the reported
    /// `n_send_max`/`n_recv_max` bounds, which start at `0` regardless.
    pub initial_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            gpu_aware_mpi: false,
            growth_factor: 1.5,
            initial_capacity: 0,
        }
    }
}

impl RouterConfig {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()
            .map_err(|e| RouterError::InvalidConfig(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| RouterError::InvalidConfig(e.to_string()))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.growth_factor <= 1.0 {
            return Err(RouterError::InvalidConfig(format!(
                "growth_factor must be > 1.0, got {}",
                self.growth_factor
            )));
        }
        Ok(())
    }
}
