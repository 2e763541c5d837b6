//! Jail root scaffolding

use crate::config::JailSpec;
use crate::mounts::{MountManager, DEV_DIR};
use crate::{JailError, Result};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;

/// Mode for the root and its plain directories
const DIR_MODE: u32 = 0o755;

/// Sticky, world-writable mode for scratch directories
const TEMP_DIR_MODE: u32 = 0o1777;

/// Where `var/lock` points, relative to `var/`
const LOCK_LINK_TARGET: &str = "../run/lock";

/// Builds the directory tree a jail needs before anything is mounted into it
#[derive(Debug)]
pub struct RootBuilder<'a> {
    spec: &'a JailSpec,
}

impl<'a> RootBuilder<'a> {
    #[must_use]
    pub const fn new(spec: &'a JailSpec) -> Self {
        Self { spec }
    }

    /// Run every scaffolding step in order. The first failure aborts.
    pub fn build(&self) -> Result<()> {
        tracing::debug!(root = %self.spec.root.display(), "building jail root");

        create_dirs(&self.spec.root)?;
        std::env::set_current_dir(&self.spec.root)
            .map_err(|e| JailError::fs(&self.spec.root, e))?;

        self.make_temp_dirs()?;
        self.link_var_lock()?;
        self.make_devices()?;
        create_dirs(&self.spec.jail_path("/etc"))?;
        self.copy_files()?;

        Ok(())
    }

    /// Create every temp dir and force mode 01777 regardless of the umask
    pub fn make_temp_dirs(&self) -> Result<()> {
        for dir in &self.spec.temp_dirs {
            let path = self.spec.jail_path(dir);
            tracing::debug!(path = %path.display(), "temp dir");
            std::fs::create_dir_all(&path).map_err(|e| JailError::fs(&path, e))?;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(TEMP_DIR_MODE))
                .map_err(|e| JailError::fs(&path, e))?;
        }
        Ok(())
    }

    /// `var/lock -> ../run/lock`, left alone if anything already sits there
    pub fn link_var_lock(&self) -> Result<()> {
        let link = self.spec.jail_path("/var/lock");
        if link.symlink_metadata().is_ok() {
            tracing::info!(path = %link.display(), "already exists");
            return Ok(());
        }
        if let Some(parent) = link.parent() {
            create_dirs(parent)?;
        }
        std::os::unix::fs::symlink(LOCK_LINK_TARGET, &link).map_err(|e| JailError::fs(&link, e))
    }

    /// Create `dev/`, back it with tmpfs when empty, then create the nodes
    pub fn make_devices(&self) -> Result<()> {
        let dev = self.spec.jail_path(DEV_DIR);
        create_dirs(&dev)?;
        MountManager::new(self.spec).mount_dev()?;

        for device in &self.spec.devices {
            let target = self.spec.jail_path(&device.path);
            device.create_at(&target)?;
        }
        Ok(())
    }

    /// Mirror host files into the jail. Missing sources are skipped.
    ///
    /// Sources always resolve against the host `/`, never the working
    /// directory, which is the jail root by now.
    pub fn copy_files(&self) -> Result<()> {
        for src in &self.spec.copy_files {
            let src = Path::new("/").join(src);
            if !src.exists() {
                tracing::debug!(path = %src.display(), "no such file, skipping");
                continue;
            }

            let dst = self.spec.jail_path(&src);
            if let Some(parent) = dst.parent() {
                create_dirs(parent)?;
            }
            tracing::info!(src = %src.display(), dst = %dst.display(), "copy");
            std::fs::copy(&src, &dst).map_err(|e| JailError::fs(&dst, e))?;
        }
        Ok(())
    }
}

fn create_dirs(path: &Path) -> Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(path)
        .map_err(|e| JailError::fs(path, e))
}
