//! Bind mounts and device nodes inside a target root.
//!
//! The lifecycle code consumes this through the [`MountManager`] trait so
//! scenario tests can record mount activity instead of requiring
//! CAP_SYS_ADMIN on the test host.

use anyhow::{Context, Result};
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::process::Cmd;

/// Character devices the package manager needs inside a bare root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceNode {
    /// /dev/random, char 1:8.
    Random,
    /// /dev/urandom, char 1:9.
    Urandom,
}

impl DeviceNode {
    /// Path of the node relative to the root.
    pub fn rel_path(self) -> &'static str {
        match self {
            DeviceNode::Random => "dev/random",
            DeviceNode::Urandom => "dev/urandom",
        }
    }

    /// Device major number.
    pub fn major(self) -> u32 {
        1
    }

    /// Device minor number.
    pub fn minor(self) -> u32 {
        match self {
            DeviceNode::Random => 8,
            DeviceNode::Urandom => 9,
        }
    }
}

/// Mount and device-node operations against a target root.
pub trait MountManager {
    /// Expose `source` at `target` without copying (bind mount).
    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()>;

    /// Unmount the filesystem mounted at `target`.
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Create a well-known character device node under `root`.
    fn create_device_node(&self, root: &Path, node: DeviceNode) -> Result<()>;
}

/// [`MountManager`] acting on the real host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostMounts;

impl MountManager for HostMounts {
    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()> {
        Cmd::new("mount")
            .arg("--bind")
            .arg_path(source)
            .arg_path(target)
            .error_msg(format!(
                "Failed to bind mount {} onto {}",
                source.display(),
                target.display()
            ))
            .run()?;
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        Cmd::new("umount")
            .arg_path(target)
            .error_msg(format!("Failed to unmount {}", target.display()))
            .run()?;
        Ok(())
    }

    fn create_device_node(&self, root: &Path, node: DeviceNode) -> Result<()> {
        let path = root.join(node.rel_path());
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let c_path = CString::new(path.as_os_str().as_bytes())
            .with_context(|| format!("Path contains NUL: {}", path.display()))?;
        let dev = libc::makedev(node.major(), node.minor());
        let ret = unsafe { libc::mknod(c_path.as_ptr(), libc::S_IFCHR | 0o644, dev) };
        if ret != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("Failed to create device node {}", path.display()));
        }
        Ok(())
    }
}
