//! Preflight checks for build validation.
//!
//! Validates that the host has the external tools a root filesystem
//! build will drive before any phase runs. This prevents cryptic errors
//! halfway through a build that has already mutated the target root.
//!
//! # Example
//!
//! ```rust
//! use rootfs_builder::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("mksquashfs") {
//!     println!("squashfs-tools not installed");
//! }
//!
//! let tools = &[("mksquashfs", "squashfs-tools"), ("chroot", "coreutils")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::process;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    process::exists(cmd)
}

/// Required host tools for root filesystem image builds.
///
/// Each tuple is (command_name, package_name). The package manager
/// binary itself is checked by its `Manager::init`, not here.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("mksquashfs", "squashfs-tools"),
    ("mkfs", "util-linux"),
    ("tune2fs", "e2fsprogs"),
    ("e2fsck", "e2fsprogs"),
    ("chroot", "coreutils"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
];

/// Check that specific tools are available.
///
/// # Arguments
///
/// * `tools` - Slice of (command, package) tuples
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check that all standard image-building tools are available.
///
/// This checks all tools in [`REQUIRED_TOOLS`].
pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)
}
