//! # Child Process Handle
//!
//! Owns the spawned load generator. Stdout and stderr go to capture files so
//! they can be shown to the operator if the tool fails; stdin is closed.
//!
//! Termination is a two-step escalation: a graceful signal (`SIGTERM` on
//! Unix), a bounded wait that polls for exit, then a forceful kill. A process
//! that has already exited is left alone.

use crate::error::{DriverError, Result};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Interval between exit checks while waiting out the grace period
const TERMINATION_POLL: Duration = Duration::from_millis(50);

/// What it took to stop the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had exited on its own
    AlreadyExited,
    /// The process exited after the graceful signal
    Graceful,
    /// The process had to be killed after the grace period
    Forced,
}

/// Everything needed to start the tool
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub program: &'a Path,
    pub args: &'a [String],
    pub working_dir: Option<&'a Path>,
    pub stdout_path: &'a Path,
    pub stderr_path: &'a Path,
}

/// A running (or finished) child process
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    started_at: DateTime<Utc>,
    status: Option<ExitStatus>,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
}

impl ProcessHandle {
    /// Start the process. The environment is inherited unchanged.
    pub fn spawn(request: &SpawnRequest<'_>) -> Result<Self> {
        let stdout = File::create(request.stdout_path)?;
        let stderr = File::create(request.stderr_path)?;

        let mut cmd = Command::new(request.program);
        cmd.args(request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(dir) = request.working_dir {
            cmd.current_dir(dir);
        }

        debug!(
            "Spawning {} {}",
            request.program.display(),
            request.args.join(" ")
        );
        let child = cmd.spawn().map_err(|source| DriverError::ProcessSpawn {
            tool: request.program.to_path_buf(),
            source,
        })?;
        let pid = child.id();
        info!("Started {} with PID {}", request.program.display(), pid);

        Ok(Self {
            child,
            pid,
            started_at: Utc::now(),
            status: None,
            stdout_path: request.stdout_path.to_path_buf(),
            stderr_path: request.stderr_path.to_path_buf(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stdout_path(&self) -> &Path {
        &self.stdout_path
    }

    pub fn stderr_path(&self) -> &Path {
        &self.stderr_path
    }

    /// Exit code once the process has exited; `None` while running or when
    /// it was terminated by a signal
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    /// Signal that terminated the process, if it was killed by one
    #[cfg(unix)]
    pub fn signal(&self) -> Option<i32> {
        use std::os::unix::process::ExitStatusExt;
        self.status.and_then(|s| s.signal())
    }

    #[cfg(not(unix))]
    pub fn signal(&self) -> Option<i32> {
        None
    }

    pub fn has_exited(&self) -> bool {
        self.status.is_some()
    }

    /// Non-blocking check for exit
    pub fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
            if let Some(status) = self.status {
                debug!("Process {} exited with {}", self.pid, status);
            }
        }
        Ok(self.status)
    }

    /// Stop the process: graceful signal, wait up to `grace`, then kill
    pub fn terminate(&mut self, grace: Duration) -> io::Result<Termination> {
        if self.poll()?.is_some() {
            return Ok(Termination::AlreadyExited);
        }

        debug!("Sending termination signal to process {}", self.pid);
        if !self.signal_graceful()? {
            self.reap()?;
            return Ok(Termination::AlreadyExited);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.poll()?.is_some() {
                return Ok(Termination::Graceful);
            }
            std::thread::sleep(TERMINATION_POLL);
        }
        if self.poll()?.is_some() {
            return Ok(Termination::Graceful);
        }

        warn!(
            "Process {} still running after {:?}, killing it",
            self.pid, grace
        );
        match self.child.kill() {
            Ok(()) => {}
            // Exited between the last poll and the kill
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        self.reap()?;
        Ok(Termination::Forced)
    }

    fn reap(&mut self) -> io::Result<()> {
        if self.status.is_none() {
            self.status = Some(self.child.wait()?);
        }
        Ok(())
    }

    /// Returns false if the process no longer exists
    #[cfg(unix)]
    fn signal_graceful(&mut self) -> io::Result<bool> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    /// Windows has no graceful equivalent for arbitrary console programs
    #[cfg(not(unix))]
    fn signal_graceful(&mut self) -> io::Result<bool> {
        match self.child.kill() {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.status.is_none() && matches!(self.child.try_wait(), Ok(None)) {
            warn!("Process {} dropped while running, killing it", self.pid);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spawn_sh(dir: &TempDir, script: &str) -> ProcessHandle {
        let args = vec!["-c".to_string(), script.to_string()];
        let stdout = dir.path().join("out");
        let stderr = dir.path().join("err");
        ProcessHandle::spawn(&SpawnRequest {
            program: Path::new("sh"),
            args: &args,
            working_dir: Some(dir.path()),
            stdout_path: &stdout,
            stderr_path: &stderr,
        })
        .unwrap()
    }

    fn wait_for_exit(handle: &mut ProcessHandle) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.poll().unwrap().is_none() {
            assert!(Instant::now() < deadline, "process did not exit");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_captures_output_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let mut handle = spawn_sh(&dir, "echo hello; echo oops >&2; exit 3");
        assert!(handle.pid() > 0);
        wait_for_exit(&mut handle);

        assert!(handle.has_exited());
        assert_eq!(handle.exit_code(), Some(3));
        let out = std::fs::read_to_string(handle.stdout_path()).unwrap();
        let err = std::fs::read_to_string(handle.stderr_path()).unwrap();
        assert_eq!(out.trim(), "hello");
        assert_eq!(err.trim(), "oops");
    }

    #[test]
    fn test_working_dir_is_applied() {
        let dir = TempDir::new().unwrap();
        let mut handle = spawn_sh(&dir, "touch marker");
        wait_for_exit(&mut handle);
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn test_terminate_exited_process_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut handle = spawn_sh(&dir, "exit 0");
        wait_for_exit(&mut handle);
        assert_eq!(
            handle.terminate(Duration::from_secs(1)).unwrap(),
            Termination::AlreadyExited
        );
        assert_eq!(handle.exit_code(), Some(0));
    }

    #[test]
    fn test_terminate_graceful() {
        let dir = TempDir::new().unwrap();
        let mut handle = spawn_sh(&dir, "exec sleep 30");
        assert_eq!(
            handle.terminate(Duration::from_secs(5)).unwrap(),
            Termination::Graceful
        );
        assert!(handle.has_exited());
        assert_eq!(handle.exit_code(), None);
        assert_eq!(handle.signal(), Some(15));
    }

    #[test]
    fn test_terminate_escalates_to_kill() {
        let dir = TempDir::new().unwrap();
        let mut handle = spawn_sh(&dir, "trap '' TERM; while true; do sleep 0.05; done");
        // Give the shell time to install the trap
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(
            handle.terminate(Duration::from_millis(300)).unwrap(),
            Termination::Forced
        );
        assert!(handle.has_exited());
    }

    #[test]
    fn test_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let stdout = dir.path().join("out");
        let stderr = dir.path().join("err");
        let err = ProcessHandle::spawn(&SpawnRequest {
            program: Path::new("/definitely/not/a/binary"),
            args: &[],
            working_dir: None,
            stdout_path: &stdout,
            stderr_path: &stderr,
        })
        .unwrap_err();
        assert!(matches!(err, DriverError::ProcessSpawn { .. }));
    }
}
