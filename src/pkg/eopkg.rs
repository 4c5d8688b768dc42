//! eopkg lifecycle orchestration for Solus-style roots.
//!
//! [`EopkgManager`] owns the phase ordering for one target root:
//!
//! 1. `init` - eopkg must resolve on the host PATH
//! 2. `init_root` - required directories, /run compat symlinks, and the
//!    shared package cache bind mount
//! 3. package operations (install, groups, repos), driven externally
//! 4. `finalize_root` - cache unmount, baselayout copy, ldconfig, dbus
//!    accounts, device nodes, dbus up, configure-pending, dbus down,
//!    cache delete
//! 5. `cleanup` - best-effort, callable from any state
//!
//! The ordering in finalize is load-bearing: device nodes and the linker
//! cache must exist before dbus can start, dbus must be up before
//! configure-pending runs its hooks, and the cache unmount must precede
//! the baselayout copy so the copy never traverses mounted cache
//! contents.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::disk;
use crate::disk::mount::{DeviceNode, HostMounts, MountManager};
use crate::error::BuildError;
use crate::pkg::dbus::DbusDaemon;
use crate::pkg::Manager;
use crate::process::{self, add_group, add_system_user, HostRunner, Runner};

/// Host-side package cache bound into every build.
///
/// Mounted at `<root>/var/cache/eopkg/packages` so downloads are shared
/// across builds. Uses the evobuild directory so Solus developers only
/// need one cache system wide.
pub const DEFAULT_CACHE_DIR: &str = "/var/lib/evobuild/packages";

/// gid/uid for the messagebus account created during finalization.
const MESSAGEBUS_ID: u32 = 18;

/// Drives eopkg to assemble a target root.
pub struct EopkgManager {
    root: Option<PathBuf>,
    cache_source: PathBuf,
    cache_target: Option<PathBuf>,
    /// Building into a directory, as opposed to operating on the live host.
    target_mode: bool,
    dbus: Option<DbusDaemon>,
    runner: Box<dyn Runner>,
    mounts: Box<dyn MountManager>,
}

impl EopkgManager {
    /// Manager operating on the real host.
    pub fn new() -> Self {
        Self::with_collaborators(Box::new(HostRunner), Box::new(HostMounts))
    }

    /// Manager with injected process/mount collaborators.
    pub fn with_collaborators(runner: Box<dyn Runner>, mounts: Box<dyn MountManager>) -> Self {
        Self {
            root: None,
            cache_source: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_target: None,
            target_mode: false,
            dbus: None,
            runner,
            mounts,
        }
    }

    /// Override the host-side cache source directory.
    pub fn set_cache_directory(&mut self, source: impl Into<PathBuf>) {
        self.cache_source = source.into();
    }

    /// Whether the transient dbus instance is currently considered running.
    pub fn service_active(&self) -> bool {
        self.dbus.as_ref().is_some_and(DbusDaemon::is_active)
    }

    fn root_path(&self) -> Result<PathBuf, BuildError> {
        self.root.clone().ok_or(BuildError::RootNotInitialized)
    }

    /// Copy every entry of `usr/share/baselayout` into `etc`.
    ///
    /// The package layout assumes these defaults live in /etc after
    /// install; files already present are overwritten.
    fn copy_baselayout(&self, root: &Path) -> Result<()> {
        let base_dir = root.join("usr/share/baselayout");
        let tgt_dir = root.join("etc");
        fs::create_dir_all(&tgt_dir)
            .with_context(|| format!("Failed to create {}", tgt_dir.display()))?;

        let entries = fs::read_dir(&base_dir)
            .with_context(|| format!("Failed to read baselayout at {}", base_dir.display()))?;
        for entry in entries {
            let entry = entry
                .with_context(|| format!("Failed to iterate {}", base_dir.display()))?;
            disk::copy_file(&entry.path(), &tgt_dir.join(entry.file_name()))?;
        }
        Ok(())
    }

    /// Run eopkg with the given arguments, targeting the root when in
    /// target mode.
    fn eopkg_exec(&self, mut args: Vec<String>) -> Result<()> {
        if self.target_mode {
            let root = self.root_path()?;
            args.push("-D".to_string());
            args.push(root.to_string_lossy().into_owned());
        }
        self.runner.run("eopkg", &args)
    }
}

impl Default for EopkgManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager for EopkgManager {
    fn init(&mut self) -> Result<()> {
        if process::which("eopkg").is_none() {
            return Err(BuildError::ToolNotFound {
                tool: "eopkg".into(),
                package: "eopkg".into(),
            }
            .into());
        }
        Ok(())
    }

    fn init_root(&mut self, root: &Path) -> Result<()> {
        self.root = Some(root.to_path_buf());
        self.target_mode = true;

        // run/lock plus the symlinks below keep /var/lock vs /run/lock
        // split layouts from diverging inside the root.
        let req_dirs = ["run/lock", "var", "var/cache/eopkg/packages"];
        for dir in req_dirs {
            let dir_path = root.join(dir);
            fs::create_dir_all(&dir_path)
                .with_context(|| format!("Failed to create {}", dir_path.display()))?;
        }

        fs::create_dir_all(&self.cache_source).with_context(|| {
            format!(
                "Failed to create cache source {}",
                self.cache_source.display()
            )
        })?;

        symlink("../run/lock", root.join("var/lock"))
            .with_context(|| format!("Failed to link var/lock in {}", root.display()))?;
        symlink("../run", root.join("var/run"))
            .with_context(|| format!("Failed to link var/run in {}", root.display()))?;

        let cache_target = root.join("var/cache/eopkg/packages");
        self.mounts.bind_mount(&self.cache_source, &cache_target)?;
        self.cache_target = Some(cache_target);

        self.dbus = Some(DbusDaemon::new(root));
        Ok(())
    }

    fn finalize_root(&mut self) -> Result<()> {
        let root = self.root_path()?;
        let cache_target = self
            .cache_target
            .clone()
            .ok_or(BuildError::RootNotInitialized)?;

        // Unmount first so nothing below ever walks into live cache
        // contents. Failure here is fatal.
        self.mounts.unmount(&cache_target)?;

        self.copy_baselayout(&root)?;

        self.runner
            .chroot_exec(&root, "ldconfig")
            .context("Failed to refresh the dynamic linker cache")?;

        add_group(self.runner.as_ref(), &root, "messagebus", MESSAGEBUS_ID)?;
        add_system_user(
            self.runner.as_ref(),
            &root,
            "messagebus",
            "D-Bus Message Daemon",
            "/var/run/dbus",
            "/bin/false",
            MESSAGEBUS_ID,
            MESSAGEBUS_ID,
        )?;

        // configure-pending runs without host device bind-mounts, so the
        // root needs its own entropy nodes.
        self.mounts.create_device_node(&root, DeviceNode::Random)?;
        self.mounts.create_device_node(&root, DeviceNode::Urandom)?;

        let dbus = self.dbus.as_mut().ok_or(BuildError::RootNotInitialized)?;
        dbus.start(self.runner.as_ref())?;

        if let Err(err) = self
            .runner
            .chroot_exec(&root, "eopkg configure-pending")
            .context("Failed to run configure-pending")
        {
            // Stop dbus before surfacing the failure; leaving it running
            // would strand a process inside a half-built root that later
            // cleanup has no way to find.
            let _ = dbus.stop(self.runner.as_ref());
            return Err(err);
        }

        dbus.stop(self.runner.as_ref())?;

        self.runner
            .chroot_exec(&root, "eopkg delete-cache")
            .context("Failed to delete the eopkg cache")?;
        Ok(())
    }

    fn install_packages(&mut self, ignore_safety: bool, packages: &[String]) -> Result<()> {
        let mut cmd = vec!["install".to_string(), "-y".to_string()];
        if self.target_mode {
            cmd.push("--ignore-comar".to_string());
        }
        cmd.extend(packages.iter().cloned());
        if ignore_safety {
            cmd.push("--ignore-safety".to_string());
        }
        self.eopkg_exec(cmd)
    }

    fn install_groups(&mut self, ignore_safety: bool, groups: &[String]) -> Result<()> {
        let mut cmd = vec!["install".to_string(), "-y".to_string()];
        if self.target_mode {
            cmd.push("--ignore-comar".to_string());
        }
        for group in groups {
            cmd.push("-c".to_string());
            cmd.push(group.clone());
        }
        if ignore_safety {
            cmd.push("--ignore-safety".to_string());
        }
        self.eopkg_exec(cmd)
    }

    fn add_repo(&mut self, identifier: &str, uri: &str) -> Result<()> {
        self.eopkg_exec(vec![
            "add-repo".to_string(),
            identifier.to_string(),
            uri.to_string(),
        ])
    }

    fn cleanup(&mut self) -> Result<()> {
        match self.dbus.as_mut() {
            Some(dbus) => dbus.stop(self.runner.as_ref()),
            None => Ok(()),
        }
    }
}
