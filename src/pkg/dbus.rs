//! Transient dbus instance inside a target root.
//!
//! eopkg's configure-pending hooks assume a system message bus, so one is
//! started inside the chroot for the duration of finalization and torn
//! down again afterwards. The supervisor is a two-state machine and both
//! transitions are idempotent: cleanup paths call [`DbusDaemon::stop`]
//! unconditionally, without checking state first, and double start/stop
//! is never an error.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::Runner;

/// Where dbus-daemon records its pid, relative to the root.
pub const PID_FILE: &str = "var/run/dbus/pid";

/// Supervisor for one dbus instance inside one root.
///
/// At most one instance per root; the active flag is private to this
/// root's orchestrator and never shared across builds.
pub struct DbusDaemon {
    root: PathBuf,
    active: bool,
}

impl DbusDaemon {
    /// Supervisor for the root at `root`, initially inactive.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            active: false,
        }
    }

    /// Whether the daemon is currently considered running.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start dbus inside the root. No-op if already active.
    ///
    /// Ensures a machine id exists first, then launches the daemon in the
    /// background. If either step fails the state stays inactive.
    pub fn start(&mut self, runner: &dyn Runner) -> Result<()> {
        if self.active {
            return Ok(());
        }
        runner
            .chroot_exec(&self.root, "dbus-uuidgen --ensure")
            .context("Failed to ensure dbus machine id")?;
        runner
            .chroot_exec(&self.root, "dbus-daemon --system")
            .context("Failed to start dbus-daemon")?;
        self.active = true;
        Ok(())
    }

    /// Stop dbus. No-op if already inactive.
    ///
    /// Best-effort teardown: the active flag clears as soon as a stop is
    /// attempted, even when the pid file is gone or the kill fails.
    /// Otherwise a cleanup path could get stuck retrying a stop that can
    /// never succeed.
    pub fn stop(&mut self, runner: &dyn Runner) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        let pid_path = self.root.join(PID_FILE);
        let contents = fs::read_to_string(&pid_path)
            .with_context(|| format!("Failed to read dbus pid file {}", pid_path.display()))?;
        let pid = contents.lines().next().unwrap_or("").trim();
        pid.parse::<u32>()
            .with_context(|| format!("Garbled dbus pid file {}", pid_path.display()))?;

        let result = runner.run("kill", &["-9".to_string(), pid.to_string()]);
        let _ = fs::remove_file(&pid_path);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl Runner for RecordingRunner {
        fn run(&self, program: &str, args: &[String]) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("{} {}", program, args.join(" ")));
            Ok(())
        }

        fn run_in(&self, _dir: &Path, program: &str, args: &[String]) -> Result<()> {
            self.run(program, args)
        }
    }

    struct FailingRunner;

    impl Runner for FailingRunner {
        fn run(&self, _program: &str, _args: &[String]) -> Result<()> {
            bail!("no processes here")
        }

        fn run_in(&self, _dir: &Path, _program: &str, _args: &[String]) -> Result<()> {
            bail!("no processes here")
        }
    }

    #[test]
    fn test_stop_never_started_is_noop() {
        let temp = TempDir::new().unwrap();
        let runner = RecordingRunner::default();
        let mut daemon = DbusDaemon::new(temp.path());

        daemon.stop(&runner).unwrap();
        assert!(!daemon.is_active());
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_double_stop_is_noop_both_times() {
        let temp = TempDir::new().unwrap();
        let runner = RecordingRunner::default();
        let mut daemon = DbusDaemon::new(temp.path());

        daemon.stop(&runner).unwrap();
        daemon.stop(&runner).unwrap();
        assert!(!daemon.is_active());
    }

    #[test]
    fn test_start_twice_launches_once() {
        let temp = TempDir::new().unwrap();
        let runner = RecordingRunner::default();
        let mut daemon = DbusDaemon::new(temp.path());

        daemon.start(&runner).unwrap();
        daemon.start(&runner).unwrap();

        let calls = runner.calls.borrow();
        let launches = calls.iter().filter(|c| c.contains("dbus-daemon")).count();
        assert_eq!(launches, 1);
        assert!(daemon.is_active());
    }

    #[test]
    fn test_failed_start_stays_inactive() {
        let temp = TempDir::new().unwrap();
        let mut daemon = DbusDaemon::new(temp.path());

        assert!(daemon.start(&FailingRunner).is_err());
        assert!(!daemon.is_active());
    }

    #[test]
    fn test_stop_with_missing_pid_file_errors_but_clears_state() {
        let temp = TempDir::new().unwrap();
        let runner = RecordingRunner::default();
        let mut daemon = DbusDaemon::new(temp.path());
        daemon.start(&runner).unwrap();

        // No pid file was ever written; the stop reports the failure but
        // the supervisor must not stay stuck active.
        assert!(daemon.stop(&runner).is_err());
        assert!(!daemon.is_active());

        // And a retry is a clean no-op.
        daemon.stop(&runner).unwrap();
    }

    #[test]
    fn test_stop_kills_recorded_pid_and_removes_file() {
        let temp = TempDir::new().unwrap();
        let runner = RecordingRunner::default();
        let mut daemon = DbusDaemon::new(temp.path());
        daemon.start(&runner).unwrap();

        let pid_path = temp.path().join(PID_FILE);
        fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
        fs::write(&pid_path, "4321\n").unwrap();

        daemon.stop(&runner).unwrap();
        assert!(!daemon.is_active());
        assert!(!pid_path.exists());
        assert!(runner.calls.borrow().iter().any(|c| c == "kill -9 4321"));
    }

    #[test]
    fn test_stop_with_garbled_pid_file_errors_but_clears_state() {
        let temp = TempDir::new().unwrap();
        let runner = RecordingRunner::default();
        let mut daemon = DbusDaemon::new(temp.path());
        daemon.start(&runner).unwrap();

        let pid_path = temp.path().join(PID_FILE);
        fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
        fs::write(&pid_path, "not-a-pid\n").unwrap();

        assert!(daemon.stop(&runner).is_err());
        assert!(!daemon.is_active());
    }
}
