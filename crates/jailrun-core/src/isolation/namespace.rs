//! Linux namespace selection for the jail bootstrap

use nix::sched::CloneFlags;

/// Namespaces created for the bootstrap child.
///
/// User and network namespaces are never requested: the jail runs with the
/// host's credentials and network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Create new UTS namespace
    pub uts: bool,
    /// Create new PID namespace
    pub pid: bool,
    /// Create new mount namespace
    pub mount: bool,
    /// Create new IPC namespace
    pub ipc: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            uts: true,
            pid: true,
            mount: true,
            ipc: true,
        }
    }
}

impl NamespaceConfig {
    /// Convert to nix CloneFlags
    #[must_use]
    pub fn to_clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();

        if self.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }
        if self.pid {
            flags |= CloneFlags::CLONE_NEWPID;
        }
        if self.mount {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        if self.ipc {
            flags |= CloneFlags::CLONE_NEWIPC;
        }

        flags
    }
}
