//! Host resource headroom check for an install.

use std::path::Path;

use dnpm_common::error::{DnpmError, Result};
use serde::{Deserialize, Serialize};

/// Whether the host has room for an install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReport {
    /// True if the install fits.
    pub is_available: bool,
    /// Why it does not fit, empty otherwise.
    pub message: String,
}

/// Reads host resources.
pub trait ResourceProbe: Send + Sync {
    /// Bytes available to unprivileged writers on the filesystem of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem cannot be queried.
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// Probe backed by `statvfs(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl ResourceProbe for StatvfsProbe {
    #[allow(clippy::useless_conversion)]
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        use nix::sys::statvfs::statvfs;

        let target = path.ancestors().find(|p| p.exists()).unwrap_or(path);
        let stat = statvfs(target).map_err(|e| DnpmError::io(target, e.into()))?;
        Ok(u64::from(stat.blocks_available()).saturating_mul(u64::from(stat.fragment_size())))
    }
}

/// Checks that `image_size` bytes fit under `path` while leaving
/// `min_free` bytes free. A failed probe is reported as unavailable.
pub fn check_availability(probe: &dyn ResourceProbe, path: &Path, image_size: u64, min_free: u64) -> AvailabilityReport {
    match probe.available_bytes(path) {
        Ok(free) if free >= image_size.saturating_add(min_free) => AvailabilityReport {
            is_available: true,
            message: String::new(),
        },
        Ok(free) => AvailabilityReport {
            is_available: false,
            message: format!(
                "Not enough disk space: {free} bytes free, {image_size} bytes needed plus {min_free} bytes of headroom"
            ),
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "disk space check failed");
            AvailabilityReport {
                is_available: false,
                message: format!("Could not check disk space: {e}"),
            }
        }
    }
}
