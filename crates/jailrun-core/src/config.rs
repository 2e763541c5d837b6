//! Jail configuration

use crate::devices::{DeviceNode, DeviceTable};
use crate::{JailError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tracing::Level;

/// Payload run when no command is given
pub const DEFAULT_COMMAND: &str = "/bin/sh";

/// Default log level handed to the bootstrap child
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How to decide whether a bind target is already mounted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountProbe {
    /// A non-empty target directory counts as mounted
    #[default]
    DirContents,
    /// Consult `/proc/self/mountinfo`
    MountTable,
}

impl FromStr for MountProbe {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dir-contents" => Ok(Self::DirContents),
            "mount-table" => Ok(Self::MountTable),
            other => Err(format!(
                "unknown probe '{other}' (expected dir-contents or mount-table)"
            )),
        }
    }
}

impl fmt::Display for MountProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirContents => f.write_str("dir-contents"),
            Self::MountTable => f.write_str("mount-table"),
        }
    }
}

/// Configuration for one jail invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JailSpec {
    /// New `/` for the jailed process (absolute)
    pub root: PathBuf,

    /// Directories under the root created with mode 01777
    pub temp_dirs: Vec<PathBuf>,

    /// Host files mirrored into the jail at the same path
    pub copy_files: Vec<PathBuf>,

    /// Character devices created under the root
    pub devices: Vec<DeviceNode>,

    /// Host paths bind mounted read-write
    pub binds: Vec<PathBuf>,

    /// Host paths bind mounted read-only
    pub ro_binds: Vec<PathBuf>,

    /// Payload executable
    pub command: String,

    /// Payload arguments
    pub args: Vec<String>,

    /// Log level for the bootstrap child
    pub log_level: String,

    /// Mount-state detection strategy
    pub probe: MountProbe,
}

impl Default for JailSpec {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            temp_dirs: vec![],
            copy_files: vec![],
            devices: DeviceTable::standard(),
            binds: vec![],
            ro_binds: vec![],
            command: DEFAULT_COMMAND.into(),
            args: vec![],
            log_level: DEFAULT_LOG_LEVEL.into(),
            probe: MountProbe::default(),
        }
    }
}

impl JailSpec {
    /// Create a new spec builder
    #[must_use]
    pub fn builder() -> JailSpecBuilder {
        JailSpecBuilder::default()
    }

    /// Turn an existing spec (e.g. loaded from a file) back into a builder
    #[must_use]
    pub fn into_builder(self) -> JailSpecBuilder {
        JailSpecBuilder { spec: self }
    }

    /// Load a spec from a JSON file. The result is not validated yet.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| JailError::fs(path, e))?;
        serde_json::from_str(&raw).map_err(|e| {
            JailError::Config(format!("invalid spec file {}: {e}", path.display()))
        })
    }

    /// Map a host-absolute (or root-relative) path to its location under the root
    #[must_use]
    pub fn jail_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.root.join(relative)
    }

    /// Check invariants that must hold before touching the filesystem
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(JailError::Config("missing root".into()));
        }
        if !self.root.is_absolute() {
            return Err(JailError::Config(format!(
                "root must be absolute: {}",
                self.root.display()
            )));
        }
        for bind in self.binds.iter().chain(&self.ro_binds) {
            if !bind.is_absolute() {
                return Err(JailError::Config(format!(
                    "bind must be an absolute host path: {}",
                    bind.display()
                )));
            }
        }
        for file in &self.copy_files {
            if !file.is_absolute() {
                return Err(JailError::Config(format!(
                    "copy file must be an absolute host path: {}",
                    file.display()
                )));
            }
        }
        let jailed = self
            .temp_dirs
            .iter()
            .chain(&self.copy_files)
            .chain(&self.binds)
            .chain(&self.ro_binds)
            .chain(self.devices.iter().map(|d| &d.path));
        for path in jailed {
            if path.components().any(|c| c == Component::ParentDir) {
                return Err(JailError::Config(format!(
                    "path escapes the jail root: {}",
                    path.display()
                )));
            }
        }
        if self.command.is_empty() {
            return Err(JailError::Config("empty payload command".into()));
        }
        parse_log_level(&self.log_level)?;
        Ok(())
    }
}

/// Builder for `JailSpec`
#[derive(Debug, Default)]
pub struct JailSpecBuilder {
    spec: JailSpec,
}

impl JailSpecBuilder {
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.spec.root = root.into();
        self
    }

    #[must_use]
    pub fn temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        push_unique(&mut self.spec.temp_dirs, path.into());
        self
    }

    #[must_use]
    pub fn copy_file(mut self, path: impl Into<PathBuf>) -> Self {
        push_unique(&mut self.spec.copy_files, path.into());
        self
    }

    #[must_use]
    pub fn devices(mut self, devices: Vec<DeviceNode>) -> Self {
        self.spec.devices = devices;
        self
    }

    #[must_use]
    pub fn bind(mut self, path: impl Into<PathBuf>) -> Self {
        push_unique(&mut self.spec.binds, path.into());
        self
    }

    #[must_use]
    pub fn ro_bind(mut self, path: impl Into<PathBuf>) -> Self {
        push_unique(&mut self.spec.ro_binds, path.into());
        self
    }

    /// Merge a preset: temp dirs, copy files and the read-only binds
    /// that exist on this host.
    #[must_use]
    pub fn preset(mut self, preset: &Preset) -> Self {
        for dir in &preset.temp_dirs {
            push_unique(&mut self.spec.temp_dirs, dir.clone());
        }
        for file in &preset.copy_files {
            push_unique(&mut self.spec.copy_files, file.clone());
        }
        for dir in preset.existing_ro_binds() {
            push_unique(&mut self.spec.ro_binds, dir);
        }
        self
    }

    #[must_use]
    pub fn command(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.spec.command = command.into();
        self.spec.args = args;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.spec.log_level = level.into();
        self
    }

    #[must_use]
    pub const fn probe(mut self, probe: MountProbe) -> Self {
        self.spec.probe = probe;
        self
    }

    /// Validate and return the spec
    pub fn build(self) -> Result<JailSpec> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

fn push_unique(list: &mut Vec<PathBuf>, path: PathBuf) {
    if !list.contains(&path) {
        list.push(path);
    }
}

/// Default environment for a jail: scratch dirs, `etc/` mirrors and the
/// host's binary and library directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub temp_dirs: Vec<PathBuf>,
    pub copy_files: Vec<PathBuf>,
    pub ro_binds: Vec<PathBuf>,
}

impl Default for Preset {
    fn default() -> Self {
        Self {
            temp_dirs: to_paths(&["/tmp", "/run/lock", "/var/tmp"]),
            copy_files: to_paths(&["/etc/group", "/etc/passwd", "/etc/resolv.conf", "/etc/hosts"]),
            ro_binds: to_paths(&[
                "/bin",
                "/sbin",
                "/lib",
                "/lib32",
                "/lib64",
                "/usr/bin",
                "/usr/sbin",
                "/usr/lib",
                "/usr/lib32",
                "/usr/lib64",
                "/usr/libexec",
                "/usr/share",
            ]),
        }
    }
}

impl Preset {
    /// Read-only binds filtered to the entries present on this host
    #[must_use]
    pub fn existing_ro_binds(&self) -> Vec<PathBuf> {
        self.ro_binds.iter().filter(|p| p.exists()).cloned().collect()
    }
}

fn to_paths(paths: &[&str]) -> Vec<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}

/// Parse a log level name.
///
/// Besides tracing's own names this accepts `warning`, `fatal` and `panic`.
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_ascii_lowercase().as_str() {
        "warning" => Ok(Level::WARN),
        "fatal" | "panic" => Ok(Level::ERROR),
        other => other
            .parse()
            .map_err(|_| JailError::Config(format!("invalid log level: {level}"))),
    }
}
