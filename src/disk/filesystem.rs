//! Format/check dispatch per filesystem type.
//!
//! Different filesystem types need different command invocations and
//! different repair semantics (ext4 wants a two-pass check-then-force-fix,
//! for example). A name-to-handler table keeps that knowledge out of the
//! orchestration code: new types are registered here, callers just name
//! the type they want.
//!
//! The table is built once at startup and passed by reference into
//! whatever needs it; there is no registration after construction.

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;

use crate::error::BuildError;
use crate::process::Cmd;

/// Formats a filesystem onto the file at the given path.
pub type FormatFn = fn(&Path) -> Result<()>;

/// Checks (and repairs) the filesystem held in the file at the given path.
pub type CheckFn = fn(&Path) -> Result<()>;

struct FsOps {
    format: FormatFn,
    check: CheckFn,
}

/// Immutable-after-construction table of filesystem handlers.
///
/// Only intended for image files and loopback devices; pointing this at a
/// real block device will happily destroy it.
pub struct FilesystemTable {
    entries: HashMap<String, FsOps>,
}

impl FilesystemTable {
    /// An empty table. Use [`FilesystemTable::with_defaults`] unless you
    /// are supplying every handler yourself.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The standard table: ext4.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register("ext4", format_ext4, check_ext4);
        table
    }

    /// Register handlers for a filesystem type. Construction-time only.
    pub fn register(&mut self, name: impl Into<String>, format: FormatFn, check: CheckFn) {
        self.entries.insert(name.into(), FsOps { format, check });
    }

    /// Whether handlers exist for the named filesystem type.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Result<&FsOps, BuildError> {
        self.entries
            .get(name)
            .ok_or_else(|| BuildError::UnknownFilesystem { name: name.into() })
    }

    /// Format `path` with the named filesystem type.
    pub fn format_as(&self, path: &Path, name: &str) -> Result<()> {
        (self.lookup(name)?.format)(path)
    }

    /// Check/repair the filesystem held at `path`.
    pub fn check_fs(&self, path: &Path, name: &str) -> Result<()> {
        (self.lookup(name)?.check)(path)
    }
}

impl Default for FilesystemTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn format_ext4(path: &Path) -> Result<()> {
    Cmd::new("mkfs")
        .args(["-t", "ext4", "-F"])
        .arg_path(path)
        .error_msg(format!("mkfs.ext4 failed for {}", path.display()))
        .run()?;
    // Zero the mount count and interval so the image never gets fsck'd
    // during live boot.
    Cmd::new("tune2fs")
        .args(["-c0", "-i0"])
        .arg_path(path)
        .error_msg(format!("tune2fs failed for {}", path.display()))
        .run()?;
    Ok(())
}

fn check_ext4(path: &Path) -> Result<()> {
    Cmd::new("e2fsck")
        .arg("-y")
        .arg_path(path)
        .error_msg(format!("e2fsck failed for {}", path.display()))
        .run()?;
    // Second pass forces a full check and fixes anything found.
    Cmd::new("e2fsck")
        .args(["-y", "-f"])
        .arg_path(path)
        .error_msg(format!("forced e2fsck failed for {}", path.display()))
        .run()?;
    Ok(())
}
