//! Jail orchestrator: run and unmount lifecycles

use crate::bootstrap::ParentLauncher;
use crate::mounts::MountManager;
use crate::rootfs::RootBuilder;
use crate::{JailError, JailSpec, Result};
use std::path::PathBuf;

/// Where an invocation got to. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JailPhase {
    /// Nothing touched yet
    Init,
    /// Root tree scaffolded
    RootBuilt,
    /// Host paths bound into the root
    Mounted,
    /// Bootstrap child running
    ChildLaunched,
    /// Child finished successfully
    Exited,
    /// Teardown finished
    Unmounted,
    /// A step failed; nothing was rolled back
    Failed,
}

/// One jail invocation, either `run` or `unmount`
#[derive(Debug)]
pub struct Jail {
    spec: JailSpec,
    phase: JailPhase,
    executable: Option<PathBuf>,
}

impl Jail {
    /// Validate `spec` and start in [`JailPhase::Init`]
    pub fn new(spec: JailSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            phase: JailPhase::Init,
            executable: None,
        })
    }

    /// Relaunch `executable` for the bootstrap child instead of ourselves
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    #[must_use]
    pub const fn phase(&self) -> JailPhase {
        self.phase
    }

    #[must_use]
    pub const fn spec(&self) -> &JailSpec {
        &self.spec
    }

    /// Build the root, mount binds, run the payload in new namespaces.
    ///
    /// Mounts are left in place on failure; call [`Jail::unmount`] to clean up.
    pub fn run(&mut self) -> Result<()> {
        self.expect_phase(JailPhase::Init)?;
        tracing::info!(root = %self.spec.root.display(), command = %self.spec.command, "starting jail");

        let result = self.run_steps();
        if let Err(e) = &result {
            tracing::error!(phase = ?self.phase, "jail failed: {e}");
            self.phase = JailPhase::Failed;
        }
        result
    }

    /// Init -> RootBuilt -> Mounted -> ChildLaunched -> Exited
    fn run_steps(&mut self) -> Result<()> {
        RootBuilder::new(&self.spec).build()?;
        self.transition(JailPhase::RootBuilt);

        MountManager::new(&self.spec).mount_all()?;
        self.transition(JailPhase::Mounted);

        let mut launcher = ParentLauncher::new(&self.spec);
        if let Some(exe) = &self.executable {
            launcher = launcher.with_executable(exe);
        }
        let pid = launcher.launch()?;
        self.transition(JailPhase::ChildLaunched);

        crate::bootstrap::wait(pid)?;
        self.transition(JailPhase::Exited);
        Ok(())
    }

    /// Detach `/dev`, binds and read-only binds under the root
    pub fn unmount(&mut self) -> Result<()> {
        self.expect_phase(JailPhase::Init)?;
        tracing::info!(root = %self.spec.root.display(), "unmounting jail");

        match MountManager::new(&self.spec).unmount_all() {
            Ok(()) => {
                self.transition(JailPhase::Unmounted);
                Ok(())
            }
            Err(e) => {
                tracing::error!("unmount failed: {e}");
                self.phase = JailPhase::Failed;
                Err(e)
            }
        }
    }

    fn expect_phase(&self, expected: JailPhase) -> Result<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(JailError::Config(format!(
                "jail for {} is in phase {:?}, expected {expected:?}",
                self.spec.root.display(),
                self.phase
            )))
        }
    }

    fn transition(&mut self, next: JailPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, "jail phase");
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_root_fails_before_touching_disk() {
        let spec = JailSpec {
            root: PathBuf::from("relative/jail"),
            ..JailSpec::default()
        };
        let err = Jail::new(spec).unwrap_err();
        assert!(matches!(err, JailError::Config(_)));
        assert!(!PathBuf::from("relative/jail").exists());
    }

    #[test]
    fn unmount_of_fresh_root_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JailSpec::builder()
            .root(dir.path())
            .bind("/srv")
            .build()
            .unwrap();

        let mut jail = Jail::new(spec.clone()).unwrap();
        jail.unmount().unwrap();
        assert_eq!(jail.phase(), JailPhase::Unmounted);

        let mut again = Jail::new(spec).unwrap();
        again.unmount().unwrap();
    }

    #[test]
    fn a_jail_is_used_once() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JailSpec::builder().root(dir.path()).build().unwrap();
        let mut jail = Jail::new(spec).unwrap();
        jail.unmount().unwrap();
        assert!(matches!(jail.run(), Err(JailError::Config(_))));
    }
}
