//! Disk image materialization.
//!
//! Creating the backing storage for a root filesystem build:
//! - [`create_sparse_file`] - hole-punched backing files for loopback images
//! - [`create_squashfs`] - compressed filesystem images via mksquashfs
//! - [`filesystem`] - format/check dispatch per filesystem type
//! - [`mount`] - bind mounts and device nodes inside a target root
//!
//! Sizes are decimal megabytes (1 MB = 1,000,000 bytes), matching the
//! units every disk vendor and partitioning tool reports.

pub mod filesystem;
pub mod mount;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

use crate::error::BuildError;
use crate::process::Cmd;

/// Compression applied to a squashfs image.
///
/// Closed set: an unsupported name is rejected when parsed, before any
/// external tool is ever invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// Fast to decompress everywhere; the safe default.
    Gzip,
    /// Smaller images, slower decompression.
    Xz,
}

impl CompressionKind {
    /// The `-comp` argument pair passed to mksquashfs.
    pub fn squashfs_args(self) -> [&'static str; 2] {
        match self {
            CompressionKind::Gzip => ["-comp", "gzip"],
            CompressionKind::Xz => ["-comp", "xz"],
        }
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionKind::Gzip => write!(f, "gzip"),
            CompressionKind::Xz => write!(f, "xz"),
        }
    }
}

impl FromStr for CompressionKind {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gzip" => Ok(CompressionKind::Gzip),
            "xz" => Ok(CompressionKind::Xz),
            other => Err(BuildError::UnknownCompression { name: other.into() }),
        }
    }
}

/// Create a sparse backing file of `size_mb` decimal megabytes.
///
/// The file's logical size is `size_mb * 1,000,000` bytes; physical
/// allocation stays minimal until blocks are actually written. Whether
/// the truncate punches a hole depends on the filesystem holding the
/// file.
pub fn create_sparse_file(path: &Path, size_mb: u64) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create sparse file {}", path.display()))?;
    file.set_len(size_mb * 1_000_000)
        .with_context(|| format!("Failed to truncate {} to {} MB", path.display(), size_mb))?;
    Ok(())
}

/// Create a squashfs image at `output` from the tree (or file) at `source`.
///
/// A directory source is packed with `-keep-as-directory` so mksquashfs
/// preserves it as the image root instead of flattening a single child.
/// The tool runs with its working directory set to the parent of the
/// output's absolute path so relative arguments resolve predictably.
///
/// On a non-zero exit the error propagates as-is; any partial output file
/// is the caller's to clean up.
pub fn create_squashfs(source: &Path, output: &Path, compression: CompressionKind) -> Result<()> {
    let source = source
        .canonicalize()
        .with_context(|| format!("Squashfs source does not exist: {}", source.display()))?;
    let output = absolutize(output)?;

    let work_dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => bail!("Output path has no parent directory: {}", output.display()),
    };
    fs::create_dir_all(&work_dir)
        .with_context(|| format!("Failed to create output directory {}", work_dir.display()))?;

    let mut cmd = Cmd::new("mksquashfs")
        .arg_path(&source)
        .arg_path(&output);
    if source.is_dir() {
        cmd = cmd.arg("-keep-as-directory");
    }
    cmd.args(compression.squashfs_args())
        .dir(&work_dir)
        .error_msg(format!("mksquashfs failed for {}", output.display()))
        .run()?;
    Ok(())
}

/// Copy a single file, preserving permissions and (best effort) mtime.
///
/// A missing source is an error: the baselayout copy during finalization
/// must not silently produce an incomplete /etc.
pub fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    let meta = fs::metadata(source)
        .with_context(|| format!("Failed to stat copy source {}", source.display()))?;

    fs::copy(source, dest)
        .with_context(|| format!("Failed to copy {} to {}", source.display(), dest.display()))?;

    // Mode travels with fs::copy; carry the mtime over too when we can.
    if let Ok(mtime) = meta.modified() {
        if let Ok(f) = File::options().write(true).open(dest) {
            let _ = f.set_modified(mtime);
        }
    }
    Ok(())
}

/// Total logical size in bytes of the tree rooted at `path`.
///
/// Useful for sizing a backing file before a build. Missing paths count
/// as zero.
pub fn tree_size(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}
