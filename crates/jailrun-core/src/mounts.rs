//! Bind mounts into the jail root and their teardown

use crate::config::{JailSpec, MountProbe};
use crate::mountinfo::MountTable;
use crate::{JailError, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::statvfs::{statvfs, FsFlags};
use std::path::{Path, PathBuf};

/// Jail-relative location of the device tmpfs
pub const DEV_DIR: &str = "/dev";

/// Mounts and unmounts host paths under a jail root
#[derive(Debug)]
pub struct MountManager<'a> {
    spec: &'a JailSpec,
}

impl<'a> MountManager<'a> {
    #[must_use]
    pub const fn new(spec: &'a JailSpec) -> Self {
        Self { spec }
    }

    /// Bind every `binds` entry read-write, then every `ro_binds` entry read-only
    pub fn mount_all(&self) -> Result<()> {
        for point in &self.spec.binds {
            self.mount(point, false)?;
        }
        for point in &self.spec.ro_binds {
            self.mount(point, true)?;
        }
        Ok(())
    }

    /// Bind `point` onto the same path under the root.
    ///
    /// Returns `false` when the target already looks mounted and nothing was done.
    pub fn mount(&self, point: &Path, readonly: bool) -> Result<bool> {
        let target = self.spec.jail_path(point);
        std::fs::create_dir_all(&target).map_err(|e| JailError::fs(&target, e))?;

        if self.is_mounted(&target)? {
            tracing::info!(target = %target.display(), "already mounted");
            return Ok(false);
        }

        tracing::info!(src = %point.display(), target = %target.display(), readonly, "bind mount");
        bind(point, &target)?;
        if readonly {
            remount_readonly(&target)?;
        }
        Ok(true)
    }

    /// Put a tmpfs over `root/dev` unless it is already populated.
    ///
    /// Some hosts mount the filesystem holding the root `nodev`, which would
    /// make every device node unusable.
    pub fn mount_dev(&self) -> Result<bool> {
        let target = self.spec.jail_path(DEV_DIR);
        if self.is_mounted(&target)? {
            tracing::debug!(target = %target.display(), "devices already provisioned");
            return Ok(false);
        }

        tracing::info!(target = %target.display(), "mounting tmpfs");
        mount(
            Some("tmpfs"),
            &target,
            Some("tmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            Some("mode=755"),
        )
        .map_err(|source| JailError::Mount {
            target: target.clone(),
            source,
        })?;
        Ok(true)
    }

    /// Tear down `/dev`, then `binds`, then `ro_binds`. Stops at the first failure.
    pub fn unmount_all(&self) -> Result<()> {
        self.unmount(Path::new(DEV_DIR))?;
        for point in &self.spec.binds {
            self.unmount(point)?;
        }
        for point in &self.spec.ro_binds {
            self.unmount(point)?;
        }
        Ok(())
    }

    /// Lazily detach the mount at `root/point`.
    ///
    /// Returns `false` when there was nothing to unmount.
    pub fn unmount(&self, point: &Path) -> Result<bool> {
        let target = self.spec.jail_path(point);
        if !self.is_mounted(&target)? {
            tracing::info!(target = %target.display(), "not mounted");
            return Ok(false);
        }

        tracing::info!(target = %target.display(), "unmounting");
        umount2(&target, MntFlags::MNT_DETACH).map_err(|source| JailError::Unmount {
            target: target.clone(),
            source,
        })?;
        Ok(true)
    }

    /// Whether `target` already carries a mount, according to the configured probe
    pub fn is_mounted(&self, target: &Path) -> Result<bool> {
        match self.spec.probe {
            MountProbe::DirContents => Ok(!is_dir_empty(target)?),
            MountProbe::MountTable => {
                let table = MountTable::read()?;
                let target = canonical_or_self(target);
                Ok(table.is_mount_point(&target))
            }
        }
    }
}

/// `true` if `path` has no entries. A missing directory counts as empty.
pub fn is_dir_empty(path: &Path) -> Result<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(JailError::fs(path, e)),
    }
}

fn canonical_or_self(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn bind(src: &Path, dst: &Path) -> Result<()> {
    mount(Some(src), dst, None::<&str>, MsFlags::MS_BIND, None::<&str>).map_err(|source| {
        JailError::Mount {
            target: dst.to_path_buf(),
            source,
        }
    })
}

/// A bind mount cannot be created read-only in one step; remount it.
/// Flags the kernel locks on the source (nosuid, nodev, noexec) must be
/// repeated or the remount is refused.
fn remount_readonly(path: &Path) -> Result<()> {
    let mut flags = MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY;
    match statvfs(path) {
        Ok(stat) => {
            let locked = stat.flags();
            if locked.contains(FsFlags::ST_NOSUID) {
                flags |= MsFlags::MS_NOSUID;
            }
            if locked.contains(FsFlags::ST_NODEV) {
                flags |= MsFlags::MS_NODEV;
            }
            if locked.contains(FsFlags::ST_NOEXEC) {
                flags |= MsFlags::MS_NOEXEC;
            }
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "statvfs failed, remounting without locked flags");
        }
    }

    mount(None::<&str>, path, None::<&str>, flags, None::<&str>).map_err(|source| {
        JailError::Mount {
            target: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remount_of_missing_path_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let err = remount_readonly(&missing).unwrap_err();
        assert!(matches!(err, JailError::Mount { .. }));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_dir_empty(&dir.path().join("nope")).unwrap());
        assert!(is_dir_empty(dir.path()).unwrap());
        std::fs::write(dir.path().join("file"), b"x").unwrap();
        assert!(!is_dir_empty(dir.path()).unwrap());
    }

    #[test]
    fn populated_target_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JailSpec::builder().root(dir.path()).build().unwrap();
        let target = spec.jail_path("/srv");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("data"), b"x").unwrap();

        let mounts = MountManager::new(&spec);
        assert!(!mounts.mount(Path::new("/srv"), true).unwrap());
    }

    #[test]
    fn empty_target_unmount_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JailSpec::builder()
            .root(dir.path())
            .bind("/srv")
            .ro_bind("/opt")
            .build()
            .unwrap();
        let mounts = MountManager::new(&spec);

        assert!(!mounts.unmount(Path::new("/srv")).unwrap());
        mounts.unmount_all().unwrap();
        mounts.unmount_all().unwrap();
    }

    #[test]
    fn mount_table_probe_ignores_stray_files() {
        if MountTable::read().is_err() {
            eprintln!("Skipping: /proc not available");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let spec = JailSpec::builder()
            .root(dir.path())
            .probe(MountProbe::MountTable)
            .build()
            .unwrap();
        let target = spec.jail_path("/srv");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("leftover"), b"x").unwrap();

        let mounts = MountManager::new(&spec);
        assert!(!mounts.is_mounted(&target).unwrap());
        assert!(!mounts.unmount(Path::new("/srv")).unwrap());
    }
}
