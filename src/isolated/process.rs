//! Worker process lifecycle management.

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Name of the worker executable shipped with this crate
pub const WORKER_BINARY: &str = "frame-worker";

/// Locate the worker executable next to the current executable.
///
/// Test binaries live one directory deeper (`target/<profile>/deps`), so the
/// parent directory is tried as well.
pub fn default_worker_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let file = format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX);
    let mut dir = exe.parent();
    while let Some(d) = dir {
        let candidate = d.join(&file);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if d.file_name().is_some_and(|n| n != "deps") {
            break;
        }
        dir = d.parent();
    }
    Err(PipelineError::Worker(format!(
        "cannot find '{}' next to {}",
        file,
        exe.display()
    )))
}

/// Handle to a running worker process
pub struct ProcessHandle {
    child: Child,
    name: String,
}

impl ProcessHandle {
    /// Spawn `program` with piped stdin/stdout and inherited stderr
    pub fn spawn(program: &Path, name: &str) -> Result<Self> {
        let child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                PipelineError::Worker(format!(
                    "Failed to spawn worker '{}' ({}): {}",
                    name,
                    program.display(),
                    e
                ))
            })?;

        tracing::info!("Spawned worker '{}' with PID {}", name, child.id());

        Ok(Self {
            child,
            name: name.to_string(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the pipe ends; each can be taken once
    pub fn take_pipes(&mut self) -> Result<(ChildStdin, ChildStdout)> {
        let stdin = self.child.stdin.take();
        let stdout = self.child.stdout.take();
        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => Ok((stdin, stdout)),
            _ => Err(PipelineError::Worker(format!(
                "pipes of worker '{}' already taken",
                self.name
            ))),
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// Check for exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().map_err(|e| {
            PipelineError::Worker(format!(
                "Failed to check worker '{}' status: {}",
                self.name, e
            ))
        })
    }

    pub fn kill(&mut self) -> Result<()> {
        tracing::warn!("Force killing worker '{}'", self.name);
        self.child.kill().map_err(|e| {
            PipelineError::Worker(format!("Failed to kill worker '{}': {}", self.name, e))
        })
    }

    /// Wait up to `timeout` for a voluntary exit, then force kill
    pub fn shutdown(&mut self, timeout: Duration) -> Result<ExitStatus> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(status) = self.try_wait()? {
                tracing::info!("Worker '{}' exited with status: {}", self.name, status);
                return Ok(status);
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        tracing::warn!(
            "Worker '{}' did not exit within {:?}, force killing",
            self.name,
            timeout
        );
        self.kill()?;
        self.child.wait().map_err(|e| {
            PipelineError::Worker(format!("Failed to reap worker '{}': {}", self.name, e))
        })
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!("Worker '{}' dropped while still running, killing", self.name);
            self.kill().ok();
            self.child.wait().ok();
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("pid", &self.child.id())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_missing_program() {
        let err = ProcessHandle::spawn(Path::new("/nonexistent/frame-worker"), "missing").unwrap_err();
        assert!(matches!(err, PipelineError::Worker(_)));
    }

    #[test]
    fn test_shutdown_kills_unresponsive_process() {
        // `cat` waits on stdin forever while we hold the pipe
        let mut handle = ProcessHandle::spawn(Path::new("/bin/cat"), "cat").unwrap();
        let (_stdin, _stdout) = handle.take_pipes().unwrap();
        assert!(handle.is_running());
        let status = handle.shutdown(Duration::from_millis(50)).unwrap();
        assert!(!status.success());
        assert!(handle.take_pipes().is_err());
    }

    #[test]
    fn test_shutdown_after_voluntary_exit() {
        let mut handle = ProcessHandle::spawn(Path::new("/bin/cat"), "cat").unwrap();
        let (stdin, _stdout) = handle.take_pipes().unwrap();
        drop(stdin);
        let status = handle.shutdown(Duration::from_secs(5)).unwrap();
        assert!(status.success());
    }
}
