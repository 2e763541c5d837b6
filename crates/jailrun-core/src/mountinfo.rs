//! Mount table inspection via `/proc/self/mountinfo`

use crate::{JailError, Result};
use std::path::{Path, PathBuf};

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Field index of the mount point.
/// Format: ID PARENT_ID MAJOR:MINOR ROOT MOUNT_POINT OPTIONS ...
const MOUNT_POINT_FIELD: usize = 4;

/// Snapshot of the current mount points
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    points: Vec<PathBuf>,
}

impl MountTable {
    /// Read the calling process's mount table
    pub fn read() -> Result<Self> {
        let raw = std::fs::read_to_string(MOUNTINFO).map_err(|e| JailError::fs(MOUNTINFO, e))?;
        Ok(Self::parse(&raw))
    }

    /// Parse mountinfo text, skipping malformed lines
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let points = raw
            .lines()
            .filter_map(|line| line.split_whitespace().nth(MOUNT_POINT_FIELD))
            .map(|field| PathBuf::from(unescape(field)))
            .collect();
        Self { points }
    }

    #[must_use]
    pub fn is_mount_point(&self, path: &Path) -> bool {
        self.points.iter().any(|p| p == path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Decode the `\ooo` octal escapes the kernel uses for space, tab,
/// newline and backslash.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal(&bytes[i + 1..=i + 3]) {
            let code = bytes[i + 1..=i + 3]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(code) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.iter().all(|b| (b'0'..=b'7').contains(b))
}
