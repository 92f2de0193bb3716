//! Free-space checks performed before an item starts downloading.

use std::path::Path;

use sysinfo::Disks;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Reports the free space of the filesystem holding a path.
pub trait SpaceProbe: Send + Sync {
    /// Available bytes, or `None` when no mounted disk contains `path`.
    fn available_space(&self, path: &Path) -> Option<u64>;
}

/// [`SpaceProbe`] backed by the host's mounted disks.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskSpaceProbe;

impl SpaceProbe for DiskSpaceProbe {
    fn available_space(&self, path: &Path) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        // Mount points are absolute; relative storage paths must be resolved first.
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        // The most specific (longest) mount point containing the path wins.
        let mut best_match: Option<(&sysinfo::Disk, usize)> = None;
        for disk in disks.list() {
            let mount_point = disk.mount_point();
            if path.starts_with(mount_point) {
                let depth = mount_point.components().count();
                if best_match.is_none_or(|(_, best)| depth > best) {
                    best_match = Some((disk, depth));
                }
            }
        }

        best_match.map(|(disk, _)| disk.available_space())
    }
}

/// Probe reporting a constant value.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpaceProbe(pub Option<u64>);

impl SpaceProbe for FixedSpaceProbe {
    fn available_space(&self, _path: &Path) -> Option<u64> {
        self.0
    }
}

/// Fails with [`Error::InsufficientDiskSpace`] when less than `required_bytes`
/// are free at `path`.
///
/// An undeterminable free space does not block the download.
pub fn ensure_space(probe: &dyn SpaceProbe, path: &Path, required_bytes: u64) -> Result<()> {
    match probe.available_space(path) {
        Some(available_bytes) if available_bytes < required_bytes => {
            warn!(
                path = %path.display(),
                available_bytes,
                required_bytes,
                "Insufficient disk space"
            );
            Err(Error::InsufficientDiskSpace {
                available_bytes,
                required_bytes,
            })
        }
        Some(available_bytes) => {
            debug!(available_bytes, required_bytes, "Disk space OK");
            Ok(())
        }
        None => {
            warn!(path = %path.display(), "Could not determine disk space");
            Ok(())
        }
    }
}
