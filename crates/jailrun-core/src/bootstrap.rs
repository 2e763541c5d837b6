//! Re-exec bootstrap: the parent relaunches its own executable inside new
//! namespaces, and that child chroots, mounts `/proc` and runs the payload.
//!
//! The two halves only share the argument vector built by
//! [`ChildDirective::to_args`].

use crate::config::JailSpec;
use crate::isolation::{clone3, NamespaceConfig};
use crate::{JailError, Result};
use nix::errno::Errno;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::fcntl::OFlag;
use nix::unistd::{chroot, pipe2, Pid};
use std::ffi::{CString, OsString};
use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Subcommand the relaunched executable is started with
pub const CHILD_DIRECTIVE: &str = "child";

/// Exit status of the child when the jail could not be entered
pub const BOOTSTRAP_FAILURE: i32 = 125;

/// Exit status when the payload exists but could not be started
pub const PAYLOAD_NOT_EXECUTABLE: i32 = 126;

/// Exit status when the payload was not found
pub const PAYLOAD_NOT_FOUND: i32 = 127;

const SELF_EXE: &str = "/proc/self/exe";
const PROC_DIR: &str = "/proc";

/// Everything the in-jail half needs, as passed on its command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDirective {
    pub root: PathBuf,
    pub log_level: String,
    pub command: String,
    pub args: Vec<String>,
}

impl ChildDirective {
    #[must_use]
    pub fn from_spec(spec: &JailSpec) -> Self {
        Self {
            root: spec.root.clone(),
            log_level: spec.log_level.clone(),
            command: spec.command.clone(),
            args: spec.args.clone(),
        }
    }

    /// Rebuild a directive from its parsed parts; `command[0]` is the payload.
    pub fn new(root: PathBuf, log_level: String, command: Vec<String>) -> Result<Self> {
        let mut command = command.into_iter();
        let program = command
            .next()
            .ok_or_else(|| JailError::Config("child directive without a command".into()))?;
        Ok(Self {
            root,
            log_level,
            command: program,
            args: command.collect(),
        })
    }

    /// `child <root> <log-level> -- <command> [args...]`
    #[must_use]
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            CHILD_DIRECTIVE.into(),
            self.root.clone().into_os_string(),
            self.log_level.clone().into(),
            "--".into(),
            self.command.clone().into(),
        ];
        args.extend(self.args.iter().map(OsString::from));
        args
    }
}

/// Parent half: relaunch ourselves inside new namespaces and wait
#[derive(Debug)]
pub struct ParentLauncher {
    directive: ChildDirective,
    namespaces: NamespaceConfig,
    executable: PathBuf,
}

impl ParentLauncher {
    #[must_use]
    pub fn new(spec: &JailSpec) -> Self {
        Self {
            directive: ChildDirective::from_spec(spec),
            namespaces: NamespaceConfig::default(),
            executable: PathBuf::from(SELF_EXE),
        }
    }

    /// Launch a different executable than the running one
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    #[must_use]
    pub const fn with_namespaces(mut self, namespaces: NamespaceConfig) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Full argument vector of the child, program name included
    #[must_use]
    pub fn argv(&self) -> Vec<OsString> {
        let argv0 = std::env::args_os()
            .next()
            .unwrap_or_else(|| OsString::from("jailrun"));
        std::iter::once(argv0)
            .chain(self.directive.to_args())
            .collect()
    }

    /// Launch the child and wait for it
    pub fn run(&self) -> Result<()> {
        let pid = self.launch()?;
        wait(pid)
    }

    /// Start the child in its namespaces. Standard streams are inherited.
    ///
    /// A failed exec is reported back over a close-on-exec pipe and surfaces
    /// as [`JailError::NamespaceLaunch`], never as a child exit status.
    pub fn launch(&self) -> Result<Pid> {
        let exe = to_cstring(self.executable.as_os_str().as_bytes())?;
        let argv = self
            .argv()
            .iter()
            .map(|arg| to_cstring(arg.as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        // built up front: the child must not allocate between clone and exec
        let argv_ptrs: Vec<*const libc::c_char> = argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        let (exec_rx, exec_tx) = pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| JailError::NamespaceLaunch(format!("pipe2 failed: {e}")))?;
        let tx_fd = exec_tx.as_raw_fd();

        let flags = self.namespaces.to_clone_flags();
        tracing::debug!(
            executable = %self.executable.display(),
            ?flags,
            "relaunching into new namespaces"
        );

        let pid = clone3::clone_into(flags, || {
            // SAFETY: exe and argv_ptrs are NUL-terminated and outlive the call
            unsafe { libc::execv(exe.as_ptr(), argv_ptrs.as_ptr()) };
            let errno = Errno::last_raw().to_ne_bytes();
            // SAFETY: tx_fd is the open write end of the exec pipe
            unsafe { libc::write(tx_fd, errno.as_ptr().cast(), errno.len()) };
            BOOTSTRAP_FAILURE
        })?;
        drop(exec_tx);

        let mut report = Vec::new();
        std::fs::File::from(exec_rx)
            .read_to_end(&mut report)
            .map_err(|e| JailError::NamespaceLaunch(format!("exec pipe: {e}")))?;
        if let Ok(raw) = <[u8; 4]>::try_from(report.as_slice()) {
            let _ = waitpid(pid, None);
            return Err(JailError::NamespaceLaunch(format!(
                "cannot exec {}: {}",
                self.executable.display(),
                Errno::from_raw(i32::from_ne_bytes(raw))
            )));
        }

        tracing::info!(pid = pid.as_raw(), "bootstrap child started");
        Ok(pid)
    }
}

/// Block until `pid` exits and turn its status into a result
pub fn wait(pid: Pid) -> Result<()> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, 0)) => {
                tracing::debug!(pid = pid.as_raw(), "child exited cleanly");
                return Ok(());
            }
            Ok(WaitStatus::Exited(_, code)) => return Err(JailError::ChildExited { code }),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Err(JailError::ChildSignaled {
                    signal: signal as i32,
                });
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(JailError::NamespaceLaunch(format!("waitpid failed: {e}"))),
        }
    }
}

fn to_cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|e| JailError::NamespaceLaunch(format!("invalid argument: {e}")))
}

/// Child half: runs inside the new namespaces
#[derive(Debug)]
pub struct ChildEntryPoint {
    directive: ChildDirective,
}

impl ChildEntryPoint {
    #[must_use]
    pub const fn new(directive: ChildDirective) -> Self {
        Self { directive }
    }

    /// Enter the jail, run the payload and return its exit code.
    ///
    /// `/proc` is unmounted again whatever the payload does.
    pub fn run(&self) -> Result<i32> {
        let root = &self.directive.root;
        std::env::set_current_dir(root).map_err(|e| JailError::fs(root, e))?;

        // keep /proc from propagating back to the host
        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )
        .map_err(|source| JailError::Mount {
            target: PathBuf::from("/"),
            source,
        })?;

        chroot(root).map_err(|e| JailError::fs(root, e.into()))?;
        std::env::set_current_dir("/").map_err(|e| JailError::fs("/", e))?;
        tracing::debug!(root = %root.display(), "chrooted");

        mount_proc()?;
        let status = self.run_payload();
        let unmounted = unmount_proc();

        let code = status?;
        unmounted?;
        Ok(code)
    }

    fn run_payload(&self) -> Result<i32> {
        let directive = &self.directive;
        tracing::info!(command = %directive.command, args = ?directive.args, "exec payload");

        let status = Command::new(&directive.command)
            .args(&directive.args)
            .status()
            .map_err(|source| JailError::PayloadLaunch {
                command: directive.command.clone(),
                source,
            })?;

        let code = status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or_default());
        tracing::debug!(code, "payload exited");
        Ok(code)
    }
}

fn mount_proc() -> Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(PROC_DIR)
        .map_err(|e| JailError::fs(PROC_DIR, e))?;

    tracing::info!("mounting /proc");
    mount(
        Some("proc"),
        PROC_DIR,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(|source| JailError::Mount {
        target: PathBuf::from(PROC_DIR),
        source,
    })
}

fn unmount_proc() -> Result<()> {
    tracing::info!("unmounting /proc");
    umount2(Path::new(PROC_DIR), MntFlags::empty()).map_err(|source| JailError::Unmount {
        target: PathBuf::from(PROC_DIR),
        source,
    })
}

/// Entry point of the `child` directive; returns the process exit code
#[must_use]
pub fn child_main(directive: ChildDirective) -> i32 {
    match ChildEntryPoint::new(directive).run() {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            match e {
                JailError::PayloadLaunch { source, .. }
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    PAYLOAD_NOT_FOUND
                }
                JailError::PayloadLaunch { .. } => PAYLOAD_NOT_EXECUTABLE,
                _ => BOOTSTRAP_FAILURE,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive() -> ChildDirective {
        ChildDirective {
            root: PathBuf::from("/tmp/j1"),
            log_level: "debug".into(),
            command: "/bin/ls".into(),
            args: vec!["-la".into(), "/".into()],
        }
    }

    #[test]
    fn directive_argument_layout() {
        let args = directive().to_args();
        let args: Vec<_> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(args, ["child", "/tmp/j1", "debug", "--", "/bin/ls", "-la", "/"]);
    }

    #[test]
    fn directive_from_parts() {
        let rebuilt = ChildDirective::new(
            PathBuf::from("/tmp/j1"),
            "debug".into(),
            vec!["/bin/ls".into(), "-la".into(), "/".into()],
        )
        .unwrap();
        assert_eq!(rebuilt, directive());
    }

    #[test]
    fn directive_needs_a_command() {
        let err = ChildDirective::new(PathBuf::from("/tmp/j1"), "info".into(), vec![]);
        assert!(matches!(err, Err(JailError::Config(_))));
    }

    #[test]
    fn directive_from_spec() {
        let spec = JailSpec::builder()
            .root("/tmp/j2")
            .command("/bin/echo", vec!["hi".into()])
            .log_level("warn")
            .build()
            .unwrap();
        let d = ChildDirective::from_spec(&spec);
        assert_eq!(d.root, PathBuf::from("/tmp/j2"));
        assert_eq!(d.log_level, "warn");
        assert_eq!(d.command, "/bin/echo");
        assert_eq!(d.args, ["hi"]);
    }

    #[test]
    fn launcher_argv_starts_with_program_name() {
        let spec = JailSpec::builder().root("/tmp/j1").build().unwrap();
        let argv = ParentLauncher::new(&spec).argv();
        assert_eq!(argv.len(), 6);
        assert_eq!(argv[1], OsString::from("child"));
        assert_eq!(argv[5], OsString::from("/bin/sh"));
    }

    #[test]
    fn failed_exec_is_a_launch_error() {
        let spec = JailSpec::builder().root("/tmp/j1").build().unwrap();
        let no_namespaces = NamespaceConfig {
            uts: false,
            pid: false,
            mount: false,
            ipc: false,
        };
        let err = ParentLauncher::new(&spec)
            .with_executable("/nonexistent/jailrun")
            .with_namespaces(no_namespaces)
            .launch()
            .unwrap_err();
        assert!(matches!(err, JailError::NamespaceLaunch(_)), "{err}");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn nul_bytes_are_rejected() {
        assert!(to_cstring(b"bad\0arg").is_err());
    }
}
