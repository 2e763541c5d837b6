//! Character device nodes inside the jail

use crate::{JailError, Result};
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// A character device to materialize under the jail root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNode {
    /// Path inside the jail, e.g. `/dev/null`
    pub path: PathBuf,
    /// Permission bits only; the file type is added at creation
    pub mode: u32,
    pub major: u64,
    pub minor: u64,
}

impl DeviceNode {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, mode: u32, major: u64, minor: u64) -> Self {
        Self {
            path: path.into(),
            mode: mode & 0o7777,
            major,
            minor,
        }
    }

    /// Kernel device number for this node
    #[must_use]
    pub fn dev(&self) -> libc::dev_t {
        makedev(self.major, self.minor)
    }

    /// Create the node at `target` unless something already exists there.
    ///
    /// Returns `true` if a node was created.
    pub fn create_at(&self, target: &Path) -> Result<bool> {
        if target.symlink_metadata().is_ok() {
            tracing::debug!(path = %target.display(), "device exists");
            return Ok(false);
        }

        tracing::debug!(
            path = %target.display(),
            major = self.major,
            minor = self.minor,
            "creating device"
        );
        mknod(
            target,
            SFlag::S_IFCHR,
            Mode::from_bits_truncate(self.mode),
            self.dev(),
        )
        .map_err(|source| JailError::Device {
            path: target.to_path_buf(),
            source,
        })?;

        // mknod is subject to the umask
        std::fs::set_permissions(target, std::fs::Permissions::from_mode(self.mode))
            .map_err(|e| JailError::fs(target, e))?;

        Ok(true)
    }
}

/// The fixed set of devices every jail gets
pub struct DeviceTable;

impl DeviceTable {
    #[must_use]
    pub fn standard() -> Vec<DeviceNode> {
        vec![
            DeviceNode::new("/dev/null", 0o666, 1, 3),
            DeviceNode::new("/dev/zero", 0o666, 1, 5),
            DeviceNode::new("/dev/random", 0o666, 1, 8),
            DeviceNode::new("/dev/urandom", 0o666, 1, 9),
        ]
    }
}
