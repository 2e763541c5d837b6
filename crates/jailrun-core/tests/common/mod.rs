//! Shared helpers for privileged jail tests

use jailrun_core::mounts::MountManager;
use jailrun_core::JailSpec;
use nix::mount::{mount, umount2, MntFlags, MsFlags};

/// Whether this process may mount, mknod and create namespaces.
///
/// Probed with a throw-away tmpfs mount; being uid 0 is not enough inside
/// most containers.
pub fn privileged() -> bool {
    if !nix::unistd::geteuid().is_root() {
        return false;
    }
    let Ok(dir) = tempfile::tempdir() else {
        return false;
    };
    let mounted = mount(
        Some("tmpfs"),
        dir.path(),
        Some("tmpfs"),
        MsFlags::empty(),
        None::<&str>,
    )
    .is_ok();
    if mounted {
        let _ = umount2(dir.path(), MntFlags::MNT_DETACH);
    }
    mounted
}

/// Unmounts everything a spec may have mounted when dropped
pub struct Teardown(pub JailSpec);

impl Drop for Teardown {
    fn drop(&mut self) {
        let _ = MountManager::new(&self.0).unmount_all();
    }
}

macro_rules! require_privileges {
    () => {
        if !common::privileged() {
            eprintln!("Skipping: needs CAP_SYS_ADMIN and CAP_MKNOD");
            return;
        }
    };
}
