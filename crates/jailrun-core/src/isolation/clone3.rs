//! clone3 syscall wrapper

use crate::{JailError, Result};
use nix::sched::CloneFlags;
use nix::unistd::Pid;

/// clone3 clone_args structure (from linux/sched.h)
#[repr(C)]
#[derive(Debug, Default)]
pub struct CloneArgs {
    /// Flags for the new process
    pub flags: u64,
    /// File descriptor for pidfd
    pub pidfd: u64,
    /// Pointer to store the child TID in the child
    pub child_tid: u64,
    /// Pointer to store the child TID in the parent
    pub parent_tid: u64,
    /// Signal to deliver on child termination
    pub exit_signal: u64,
    /// Stack pointer (0 = copy parent stack)
    pub stack: u64,
    /// Stack size (0 if using parent stack)
    pub stack_size: u64,
    /// TLS pointer
    pub tls: u64,
}

/// Wrapper around the clone3 syscall
///
/// # Safety
/// Forks the calling process. The caller must be single-threaded and the
/// child may only perform async-signal-safe work before exec or `_exit`.
pub unsafe fn clone3(args: &CloneArgs) -> Result<libc::pid_t> {
    // SAFETY: args points to a valid clone_args of the size we pass
    let ret = unsafe {
        libc::syscall(
            libc::SYS_clone3,
            std::ptr::from_ref(args),
            std::mem::size_of::<CloneArgs>(),
        )
    };

    if ret == -1 {
        return Err(JailError::NamespaceLaunch(format!(
            "clone3 failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    libc::pid_t::try_from(ret)
        .map_err(|_| JailError::NamespaceLaunch(format!("clone3 returned bogus pid {ret}")))
}

/// Fork a child directly into the namespaces named by `flags`.
///
/// The child runs `child_fn` and exits with the code it returns; the
/// parent gets the child's pid.
#[allow(clippy::cast_sign_loss)]
pub fn clone_into(flags: CloneFlags, child_fn: impl FnOnce() -> i32) -> Result<Pid> {
    let args = CloneArgs {
        flags: flags.bits() as u64,
        exit_signal: libc::SIGCHLD as u64,
        ..Default::default()
    };

    // SAFETY: jailrun is single-threaded when it launches the bootstrap child
    let pid = unsafe { clone3(&args)? };

    if pid == 0 {
        let code = child_fn();
        // SAFETY: leave the forked child without running parent destructors
        unsafe { libc::_exit(code) };
    }

    Ok(Pid::from_raw(pid))
}
