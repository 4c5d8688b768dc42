//! Build definition parsing.
//!
//! An [`ImageSpec`] is the TOML document describing one image build: what
//! the image is called, how its backing storage is formatted, which
//! package manager assembles the root, and what goes into it. Unknown
//! package manager or compression names are rejected here, at parse
//! time, so a misconfigured build never reaches the orchestration code.
//!
//! ```toml
//! name = "solus-minimal"
//! size_mb = 4000
//! filesystem = "ext4"
//! compression = "xz"
//! package_manager = "eopkg"
//!
//! groups = ["system.base"]
//! packages = ["nano"]
//!
//! [[repos]]
//! name = "Solus"
//! uri = "https://packages.getsol.us/shannon/eopkg-index.xml.xz"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::disk::CompressionKind;
use crate::pkg::PackageManagerKind;

/// One repository the target should pull packages from.
#[derive(Debug, Clone, Deserialize)]
pub struct Repo {
    /// Identifier shown by the package manager.
    pub name: String,
    /// Index URI.
    pub uri: String,
}

/// Declarative description of one image build.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSpec {
    /// Image name; the output file becomes `<name>.squashfs`.
    pub name: String,

    /// Backing image size in decimal megabytes. Omit to size from the
    /// built tree, with headroom for filesystem metadata.
    #[serde(default)]
    pub size_mb: Option<u64>,

    /// Filesystem type for the backing image.
    #[serde(default = "default_filesystem")]
    pub filesystem: String,

    /// Squashfs compression.
    #[serde(default = "default_compression")]
    pub compression: CompressionKind,

    /// Which package manager assembles the root.
    pub package_manager: PackageManagerKind,

    /// Skip the package manager's automatic dependency set.
    #[serde(default)]
    pub ignore_safety: bool,

    #[serde(default)]
    pub repos: Vec<Repo>,

    /// Component groups to install before individual packages.
    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub packages: Vec<String>,
}

fn default_filesystem() -> String {
    "ext4".to_string()
}

fn default_compression() -> CompressionKind {
    CompressionKind::Gzip
}

impl ImageSpec {
    /// Parse a spec from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse image spec")
    }

    /// Load a spec from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read image spec {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Invalid image spec {}", path.display()))
    }

    /// File name of the squashfs image this spec produces.
    pub fn image_file_name(&self) -> String {
        format!("{}.squashfs", self.name)
    }

    /// File name of the formatted backing image this spec produces.
    pub fn backing_file_name(&self) -> String {
        format!("{}.img", self.name)
    }
}
