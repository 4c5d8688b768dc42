//! Centralized command execution with consistent error handling.
//!
//! Every external tool this crate drives (eopkg, mkfs, mksquashfs, mount,
//! chroot) goes through [`Cmd`], which resolves the program on PATH,
//! inherits the parent's stdout/stderr by default, and keeps stdin
//! disabled so a misbehaving tool can never hang a build waiting for
//! input. The [`Runner`] trait is the seam the lifecycle code calls
//! through, so tests can substitute a scripted runner.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Result of a captured command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// How the child's stdin is wired up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StdinMode {
    /// No stdin; the child reads EOF immediately. Default.
    Disabled,
    /// Inherit the parent's stdin (interactive tools).
    Inherit,
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    stdin: StdinMode,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            stdin: StdinMode::Disabled,
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Inherit the parent's stdin instead of disabling it.
    pub fn stdin_inherit(mut self) -> Self {
        self.stdin = StdinMode::Inherit;
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(match self.stdin {
            StdinMode::Disabled => Stdio::null(),
            StdinMode::Inherit => Stdio::inherit(),
        });
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn check_status(&self, code: i32, stderr: &str) -> Result<()> {
        let prefix = self
            .error_prefix
            .clone()
            .unwrap_or_else(|| format!("'{}' failed", self.program));
        if stderr.is_empty() {
            bail!("{} (exit code {})", prefix, code);
        }
        bail!("{} (exit code {}):\n{}", prefix, code, stderr);
    }

    /// Run the command, streaming stdout/stderr to the parent's streams.
    ///
    /// This is the default mode for build phases: the operator sees tool
    /// output as it happens.
    pub fn run(self) -> Result<ExitStatus> {
        let mut cmd = self.command();
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        let status = cmd
            .status()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        if !self.allow_fail && !status.success() {
            self.check_status(status.code().unwrap_or(-1), "")?;
        }

        Ok(status)
    }

    /// Run the command and capture output.
    ///
    /// On failure the captured stderr is folded into the error message.
    pub fn output(self) -> Result<CommandResult> {
        let output = self
            .command()
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            self.check_status(result.code(), result.stderr_trimmed())?;
        }

        Ok(result)
    }
}

/// Seam for running external programs.
///
/// Lifecycle code (`pkg::eopkg`, `pkg::dbus`) calls external tools only
/// through this trait, so ordering tests can substitute a scripted
/// implementation without touching the host.
pub trait Runner {
    /// Run a program with arguments, streaming output.
    fn run(&self, program: &str, args: &[String]) -> Result<()>;

    /// Run a program in a specific working directory.
    fn run_in(&self, dir: &Path, program: &str, args: &[String]) -> Result<()>;

    /// Run a shell command inside a chroot at `root`.
    fn chroot_exec(&self, root: &Path, command: &str) -> Result<()> {
        let args = vec![
            root.to_string_lossy().into_owned(),
            "/bin/sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ];
        self.run("chroot", &args)
    }
}

/// [`Runner`] backed by real process execution via [`Cmd`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRunner;

impl Runner for HostRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<()> {
        Cmd::new(program).args(args).run()?;
        Ok(())
    }

    fn run_in(&self, dir: &Path, program: &str, args: &[String]) -> Result<()> {
        Cmd::new(program).args(args).dir(dir).run()?;
        Ok(())
    }
}

/// Add a group inside the chroot at `root`.
pub fn add_group(runner: &dyn Runner, root: &Path, name: &str, gid: u32) -> Result<()> {
    let cmd = format!("/usr/sbin/groupadd -g {} \"{}\"", gid, name);
    runner
        .chroot_exec(root, &cmd)
        .with_context(|| format!("Failed to add group '{}'", name))
}

/// Add a system user inside the chroot at `root`.
pub fn add_system_user(
    runner: &dyn Runner,
    root: &Path,
    name: &str,
    gecos: &str,
    home: &str,
    shell: &str,
    uid: u32,
    gid: u32,
) -> Result<()> {
    let cmd = format!(
        "/usr/sbin/useradd -m -d \"{}\" -r -s \"{}\" -u {} -g {} \"{}\" -c \"{}\"",
        home, shell, uid, gid, name, gecos
    );
    runner
        .chroot_exec(root, &cmd)
        .with_context(|| format!("Failed to add system user '{}'", name))
}

/// Locate a program on PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Check if a program exists in PATH (bool version).
pub fn exists(program: &str) -> bool {
    which(program).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let status = Cmd::new("true").run().unwrap();
        assert!(status.success());
    }

    #[test]
    fn test_output_captures_stdout() {
        let result = Cmd::new("echo").arg("hello").output().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_output_captures_stderr() {
        let result = Cmd::new("ls")
            .arg("/nonexistent_path_12345")
            .allow_fail()
            .output()
            .unwrap();

        assert!(!result.success());
        assert!(!result.stderr.is_empty());
    }

    #[test]
    fn test_output_failure_includes_stderr() {
        let err = Cmd::new("ls")
            .arg("/nonexistent_path_12345")
            .output()
            .unwrap_err();
        let msg = err.to_string();

        assert!(msg.contains("No such file") || msg.contains("cannot access"));
    }

    #[test]
    fn test_run_missing_program() {
        let err = Cmd::new("nonexistent_program_12345").run().unwrap_err();
        assert!(err.to_string().contains("nonexistent_program_12345"));
    }

    #[test]
    fn test_custom_error_message() {
        let err = Cmd::new("false")
            .error_msg("Custom build step failed")
            .run()
            .unwrap_err();

        assert!(err.to_string().contains("Custom build step failed"));
    }

    #[test]
    fn test_allow_fail() {
        let status = Cmd::new("false").allow_fail().run().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_run_in_directory() {
        let result = Cmd::new("pwd").dir(Path::new("/tmp")).output().unwrap();
        assert!(result.stdout_trimmed().contains("tmp"));
    }

    #[test]
    fn test_stdin_disabled_by_default() {
        // `cat` with no stdin would block forever; with stdin disabled it
        // reads EOF and exits immediately.
        let result = Cmd::new("cat").output().unwrap();
        assert!(result.success());
        assert!(result.stdout.is_empty());
    }

    #[test]
    fn test_which_exists() {
        assert!(which("sh").is_some());
        assert!(exists("sh"));
    }

    #[test]
    fn test_which_not_exists() {
        assert!(which("nonexistent_program_12345").is_none());
        assert!(!exists("nonexistent_program_12345"));
    }

    #[test]
    fn test_chroot_exec_argv_shape() {
        struct Recording(std::cell::RefCell<Vec<(String, Vec<String>)>>);
        impl Runner for Recording {
            fn run(&self, program: &str, args: &[String]) -> Result<()> {
                self.0.borrow_mut().push((program.into(), args.to_vec()));
                Ok(())
            }
            fn run_in(&self, _dir: &Path, program: &str, args: &[String]) -> Result<()> {
                self.run(program, args)
            }
        }

        let rec = Recording(Default::default());
        rec.chroot_exec(Path::new("/tmp/root"), "ldconfig").unwrap();

        let calls = rec.0.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "chroot");
        assert_eq!(
            calls[0].1,
            vec!["/tmp/root", "/bin/sh", "-c", "ldconfig"]
        );
    }
}
