//! Package manager capability.
//!
//! A [`Manager`] drives one concrete package manager through the build
//! lifecycle: host-side init, root preparation, package installation,
//! finalization, and cleanup. The build driver selects the variant by
//! [`PackageManagerKind`]; unknown names are rejected when the build
//! configuration is parsed, never at dispatch time.

pub mod dbus;
pub mod eopkg;

use anyhow::Result;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::BuildError;

/// Lifecycle contract every package manager implementation honors.
///
/// `cleanup` may be called at any time, from any state, any number of
/// times; implementations must make it a best-effort no-op when there is
/// nothing to clean.
pub trait Manager {
    /// Verify host-side dependencies (the package manager binary itself).
    fn init(&mut self) -> Result<()>;

    /// Prepare the target root for package operations: required
    /// directories, layout quirks, and the package cache bind mount.
    fn init_root(&mut self, root: &Path) -> Result<()>;

    /// Run once all package operations have been applied: post-install
    /// configuration, service bring-up/tear-down, cache removal.
    fn finalize_root(&mut self) -> Result<()>;

    /// Install the named packages into the target.
    ///
    /// `ignore_safety` skips the implementation's automatic dependency
    /// set (system.base on Solus).
    fn install_packages(&mut self, ignore_safety: bool, packages: &[String]) -> Result<()>;

    /// Install the named component groups into the target.
    fn install_groups(&mut self, ignore_safety: bool, groups: &[String]) -> Result<()>;

    /// Add a package repository to the target.
    fn add_repo(&mut self, identifier: &str, uri: &str) -> Result<()>;

    /// Undo anything still live from earlier phases (stray processes,
    /// mounts). Safe from any state.
    fn cleanup(&mut self) -> Result<()>;
}

/// The package manager variants this crate can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    /// eopkg, the Solus package manager.
    Eopkg,
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageManagerKind::Eopkg => write!(f, "eopkg"),
        }
    }
}

impl FromStr for PackageManagerKind {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eopkg" => Ok(PackageManagerKind::Eopkg),
            other => Err(BuildError::UnknownPackageManager { name: other.into() }),
        }
    }
}

/// Construct the manager for the given kind.
pub fn new_manager(kind: PackageManagerKind) -> Box<dyn Manager> {
    match kind {
        PackageManagerKind::Eopkg => Box::new(eopkg::EopkgManager::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_round_trip() {
        let kind: PackageManagerKind = "eopkg".parse().unwrap();
        assert_eq!(kind, PackageManagerKind::Eopkg);
        assert_eq!(kind.to_string(), "eopkg");
    }

    #[test]
    fn test_kind_rejects_unknown_name() {
        let err = "dpkg".parse::<PackageManagerKind>().unwrap_err();
        assert!(matches!(err, BuildError::UnknownPackageManager { ref name } if name == "dpkg"));
    }
}
