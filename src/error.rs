//! Build error kinds that callers need to tell apart.
//!
//! Most failures in this crate travel as `anyhow` context chains; the
//! variants here exist for the cases where the *kind* of failure matters
//! to the build driver (configuration mistakes, ordering violations,
//! missing host tools).

use thiserror::Error;

/// Distinguishable build failures.
#[derive(Error, Debug)]
pub enum BuildError {
    /// A required external program is absent from the search path.
    #[error("required tool '{tool}' not found in PATH (install: {package})")]
    ToolNotFound { tool: String, package: String },

    /// A filesystem type with no registered format/check handlers.
    #[error("unknown filesystem '{name}'")]
    UnknownFilesystem { name: String },

    /// A compression kind outside the supported set.
    #[error("unknown compression kind '{name}' (supported: gzip, xz)")]
    UnknownCompression { name: String },

    /// A package manager name with no concrete implementation.
    #[error("unknown package manager '{name}'")]
    UnknownPackageManager { name: String },

    /// A lifecycle operation ran before the root was prepared.
    #[error("root filesystem has not been initialized; call init_root first")]
    RootNotInitialized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_subject() {
        let err = BuildError::UnknownFilesystem {
            name: "btrfs".into(),
        };
        assert!(err.to_string().contains("btrfs"));

        let err = BuildError::ToolNotFound {
            tool: "mksquashfs".into(),
            package: "squashfs-tools".into(),
        };
        assert!(err.to_string().contains("mksquashfs"));
        assert!(err.to_string().contains("squashfs-tools"));
    }
}
