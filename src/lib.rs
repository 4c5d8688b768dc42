//! Phase-ordered root filesystem image build orchestration.
//!
//! This crate drives external tools (eopkg, mkfs/e2fsck, mksquashfs,
//! mount, chroot) through the lifecycle that assembles a Linux root
//! filesystem and materializes it as an image:
//!
//! - **Package manager lifecycle** - the [`pkg::Manager`] trait and its
//!   eopkg implementation: root preparation, package operations,
//!   finalization (dbus bring-up, configure-pending, tear-down), and
//!   best-effort cleanup callable from any state
//! - **Disk materialization** - sparse backing files, a filesystem
//!   format/check table, squashfs creation
//! - **Build driver** - [`build::build_image`] wiring preflight, the
//!   package phases, and image creation together, with cleanup on any
//!   failure path
//!
//! # Architecture
//!
//! ```text
//! build::build_image
//!     │
//!     ├── preflight       host tool validation
//!     ├── pkg::Manager    lifecycle phases (init_root → install → finalize)
//!     │     └── pkg::dbus transient message bus inside the root
//!     ├── disk            sparse files, FilesystemTable, squashfs
//!     │     └── disk::mount  bind mounts + device nodes (MountManager)
//!     └── process         Cmd / Runner command execution
//! ```
//!
//! One build is one sequential control flow; there is no internal
//! concurrency and no retry logic. Builds against different roots may
//! run in parallel; they share only the host-side package cache, whose
//! concurrent bind-mounting is the mount mechanism's concern, not ours.
//!
//! # Example
//!
//! ```rust,ignore
//! use rootfs_builder::config::ImageSpec;
//! use rootfs_builder::FilesystemTable;
//! use std::path::Path;
//!
//! let spec = ImageSpec::load(Path::new("solus-minimal.toml"))?;
//! let table = FilesystemTable::with_defaults();
//! let image = rootfs_builder::build::build_image(
//!     &spec,
//!     Path::new("/tmp/buildA"),
//!     Path::new("output/"),
//!     &table,
//! )?;
//! println!("built {}", image.display());
//! ```

pub mod build;
pub mod config;
pub mod disk;
pub mod error;
pub mod pkg;
pub mod preflight;
pub mod process;

pub use config::ImageSpec;
pub use disk::filesystem::FilesystemTable;
pub use disk::CompressionKind;
pub use error::BuildError;
pub use pkg::{Manager, PackageManagerKind};
pub use process::Cmd;
