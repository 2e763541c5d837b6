//! Error types for jailrun-core

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JailError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot create device {}: {source}", .path.display())]
    Device { path: PathBuf, source: nix::Error },

    #[error("cannot mount {}: {source}", .target.display())]
    Mount { target: PathBuf, source: nix::Error },

    #[error("cannot unmount {}: {source}", .target.display())]
    Unmount { target: PathBuf, source: nix::Error },

    #[error("namespace launch error: {0}")]
    NamespaceLaunch(String),

    #[error("cannot start {command}: {source}")]
    PayloadLaunch {
        command: String,
        source: std::io::Error,
    },

    #[error("jailed process exited with status {code}")]
    ChildExited { code: i32 },

    #[error("jailed process killed by signal {signal}")]
    ChildSignaled { signal: i32 },
}

impl JailError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this error.
    ///
    /// A child's exit status is propagated as-is and a signal maps to
    /// `128 + signo`, like a shell does.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ChildExited { code } => *code,
            Self::ChildSignaled { signal } => 128 + *signal,
            _ => 1,
        }
    }
}
