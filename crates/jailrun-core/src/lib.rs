//! # jailrun-core
//!
//! Ephemeral chroot jails for Linux.
//!
//! This crate provides the jail lifecycle:
//! - Root scaffolding (temp dirs, `/dev` tmpfs, device nodes, `etc/` mirrors)
//! - Bind mounts from the host, read-write or read-only, and their teardown
//! - A re-exec bootstrap that starts in fresh UTS/PID/mount/IPC namespaces,
//!   chroots, mounts a private `/proc` and runs the payload

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod config;
pub mod devices;
pub mod error;
pub mod isolation;
pub mod jail;
pub mod mountinfo;
pub mod mounts;
pub mod rootfs;

pub use config::{JailSpec, MountProbe, Preset};
pub use error::JailError;
pub use jail::{Jail, JailPhase};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, JailError>;

/// Version string printed by `jailrun version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
