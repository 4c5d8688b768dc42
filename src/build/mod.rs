//! Build driver: ties the lifecycle phases together for one image.
//!
//! The driver owns the rollback contract the lifecycle code deliberately
//! does not: every phase returns its first error with no multi-step
//! rollback, and it is this layer that invokes `cleanup()` when any
//! phase fails. There is no retry logic anywhere; a caller wanting
//! retries or deadlines wraps these functions.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::config::ImageSpec;
use crate::disk::{self, filesystem::FilesystemTable};
use crate::error::BuildError;
use crate::pkg::{self, Manager};
use crate::preflight;

/// Create a formatted backing image: sparse file plus filesystem.
///
/// The filesystem type is validated against the table before the file is
/// touched, so an unknown type leaves nothing behind.
pub fn create_backing_image(
    path: &Path,
    size_mb: u64,
    filesystem: &str,
    table: &FilesystemTable,
) -> Result<()> {
    if !table.contains(filesystem) {
        return Err(BuildError::UnknownFilesystem {
            name: filesystem.into(),
        }
        .into());
    }
    disk::create_sparse_file(path, size_mb)?;
    table.format_as(path, filesystem)?;
    Ok(())
}

/// Backing image size in decimal megabytes: the configured size, or the
/// assembled tree's size plus ten percent headroom for filesystem
/// metadata when none was configured.
pub fn backing_size_mb(spec: &ImageSpec, root: &Path) -> Result<u64> {
    if let Some(size) = spec.size_mb {
        return Ok(size);
    }
    let bytes = disk::tree_size(root)?;
    let mb = bytes.div_ceil(1_000_000);
    Ok(mb + mb / 10 + 1)
}

/// Build the image described by `spec`: assemble the root at `root`,
/// create a formatted backing image sized for the tree, then materialize
/// a compressed image (plus `.sha256` sidecar) in `output_dir`.
///
/// Returns the path of the finished squashfs image.
pub fn build_image(
    spec: &ImageSpec,
    root: &Path,
    output_dir: &Path,
    table: &FilesystemTable,
) -> Result<PathBuf> {
    preflight::check_host_tools()?;

    let mut manager = pkg::new_manager(spec.package_manager);
    manager.init()?;

    println!("Assembling root at {}...", root.display());
    run_phases(manager.as_mut(), spec, root)?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let backing = output_dir.join(spec.backing_file_name());
    let size_mb = backing_size_mb(spec, root)?;
    println!(
        "Creating {} ({} MB, {})...",
        backing.display(),
        size_mb,
        spec.filesystem
    );
    create_backing_image(&backing, size_mb, &spec.filesystem, table)?;
    // Verify the freshly formatted image before handing it off.
    table.check_fs(&backing, &spec.filesystem)?;

    let image = output_dir.join(spec.image_file_name());
    println!(
        "Creating {} with {} compression...",
        image.display(),
        spec.compression
    );
    disk::create_squashfs(root, &image, spec.compression)?;
    write_checksum(&image)?;

    Ok(image)
}

/// Run the package phases against `root`, invoking the manager's
/// `cleanup` if any phase fails.
///
/// The phases themselves return their first error with nothing undone;
/// this is the layer that owns the rollback call.
fn run_phases(manager: &mut dyn Manager, spec: &ImageSpec, root: &Path) -> Result<()> {
    let result = apply_phases(manager, spec, root);
    if result.is_err() {
        let _ = manager.cleanup();
    }
    result
}

fn apply_phases(manager: &mut dyn Manager, spec: &ImageSpec, root: &Path) -> Result<()> {
    manager.init_root(root)?;
    for repo in &spec.repos {
        manager.add_repo(&repo.name, &repo.uri)?;
    }
    if !spec.groups.is_empty() {
        manager.install_groups(spec.ignore_safety, &spec.groups)?;
    }
    if !spec.packages.is_empty() {
        manager.install_packages(spec.ignore_safety, &spec.packages)?;
    }
    manager.finalize_root()
}

/// Write a `<image>.sha256` sidecar in `sha256sum -c` format.
///
/// Returns the sidecar path.
pub fn write_checksum(path: &Path) -> Result<PathBuf> {
    let sha = sha256_file(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let sidecar = PathBuf::from(format!("{}.sha256", path.display()));
    fs::write(&sidecar, format!("{}  {}\n", sha, file_name))
        .with_context(|| format!("Failed to write checksum {}", sidecar.display()))?;
    Ok(sidecar)
}

fn sha256_file(path: &Path) -> Result<String> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Default)]
    struct ScriptedManager {
        calls: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl ScriptedManager {
        fn record(&mut self, name: &str) -> Result<()> {
            self.calls.push(name.to_string());
            if self.fail_on == Some(name) {
                anyhow::bail!("scripted failure in {}", name);
            }
            Ok(())
        }
    }

    impl Manager for ScriptedManager {
        fn init(&mut self) -> Result<()> {
            self.record("init")
        }
        fn init_root(&mut self, _root: &Path) -> Result<()> {
            self.record("init_root")
        }
        fn finalize_root(&mut self) -> Result<()> {
            self.record("finalize_root")
        }
        fn install_packages(&mut self, _ignore_safety: bool, _packages: &[String]) -> Result<()> {
            self.record("install_packages")
        }
        fn install_groups(&mut self, _ignore_safety: bool, _groups: &[String]) -> Result<()> {
            self.record("install_groups")
        }
        fn add_repo(&mut self, _identifier: &str, _uri: &str) -> Result<()> {
            self.record("add_repo")
        }
        fn cleanup(&mut self) -> Result<()> {
            self.record("cleanup")
        }
    }

    fn full_spec() -> ImageSpec {
        ImageSpec::from_toml(
            r#"
            name = "tiny"
            package_manager = "eopkg"
            groups = ["system.base"]
            packages = ["nano"]

            [[repos]]
            name = "Solus"
            uri = "https://mirror.example/eopkg-index.xml.xz"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_run_phases_order_without_cleanup_on_success() {
        let mut manager = ScriptedManager::default();
        run_phases(&mut manager, &full_spec(), Path::new("/tmp/buildA")).unwrap();

        assert_eq!(
            manager.calls,
            vec![
                "init_root",
                "add_repo",
                "install_groups",
                "install_packages",
                "finalize_root",
            ]
        );
    }

    #[test]
    fn test_run_phases_cleans_up_when_finalize_fails() {
        let mut manager = ScriptedManager {
            fail_on: Some("finalize_root"),
            ..Default::default()
        };

        let err = run_phases(&mut manager, &full_spec(), Path::new("/tmp/buildA")).unwrap_err();
        assert!(err.to_string().contains("finalize_root"));
        assert_eq!(manager.calls.last().unwrap(), "cleanup");
    }

    #[test]
    fn test_run_phases_cleans_up_when_init_root_fails() {
        let mut manager = ScriptedManager {
            fail_on: Some("init_root"),
            ..Default::default()
        };

        assert!(run_phases(&mut manager, &full_spec(), Path::new("/tmp/buildA")).is_err());
        assert_eq!(manager.calls, vec!["init_root", "cleanup"]);
    }

    #[test]
    fn test_backing_size_prefers_configured_size() {
        let temp = TempDir::new().unwrap();
        let mut spec = full_spec();
        spec.size_mb = Some(4000);
        assert_eq!(backing_size_mb(&spec, temp.path()).unwrap(), 4000);
    }

    #[test]
    fn test_backing_size_derived_from_tree_with_headroom() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("blob"), vec![0u8; 2_500_000]).unwrap();

        let mut spec = full_spec();
        spec.size_mb = None;
        // 2.5 MB of content rounds up to 3 MB, plus headroom.
        assert_eq!(backing_size_mb(&spec, temp.path()).unwrap(), 4);
    }

    #[test]
    fn test_create_backing_image_rejects_unknown_fs_without_side_effects() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backing.img");
        let table = FilesystemTable::with_defaults();

        let err = create_backing_image(&path, 10, "unknown-fs", &table).unwrap_err();
        assert!(err.to_string().contains("unknown-fs"));
        assert!(!path.exists());
    }

    #[test]
    fn test_write_checksum_sidecar() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("img.squashfs");
        fs::write(&image, b"hello world").unwrap();

        let sidecar = write_checksum(&image).unwrap();
        let contents = fs::read_to_string(&sidecar).unwrap();

        // sha256 of "hello world"
        assert!(contents.starts_with(
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        ));
        assert!(contents.trim_end().ends_with("img.squashfs"));
    }

    #[test]
    fn test_sha256_empty_file() {
        let temp = TempDir::new().unwrap();
        let f = temp.path().join("empty");
        fs::write(&f, b"").unwrap();
        assert_eq!(
            sha256_file(&f).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
