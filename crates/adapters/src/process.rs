// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spawning and terminating the five worker processes (§4.1).

use std::path::Path;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {exe}: {source}")]
    Spawn { exe: String, #[source] source: std::io::Error },

    #[error("failed to signal pid {pid}: {source}")]
    Signal { pid: u32, #[source] source: nix::Error },
}

/// Process lifecycle operations the supervisor needs. A trait so the
/// engine's tests can substitute a fake rather than spawning real
/// executables.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, exe_path: &Path, args: &[String]) -> Result<u32, ProcessError>;

    /// Ask the process to exit (`SIGTERM`). Idempotent: signalling a pid
    /// that is already gone is not an error (§8 property 7).
    async fn terminate(&self, pid: u32) -> Result<(), ProcessError>;

    /// Force the process to exit (`SIGKILL`), used once a graceful
    /// termination deadline has passed.
    async fn kill(&self, pid: u32) -> Result<(), ProcessError>;

    /// Whether a pid still refers to a live process.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Real launcher backed by `tokio::process`.
#[derive(Default)]
pub struct SystemLauncher {
    children: parking_lot::Mutex<std::collections::HashMap<u32, Child>>,
}

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn spawn(&self, exe_path: &Path, args: &[String]) -> Result<u32, ProcessError> {
        let child = Command::new(exe_path)
            .args(args)
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| ProcessError::Spawn { exe: exe_path.display().to_string(), source })?;
        let pid = child.id().unwrap_or_default();
        self.children.lock().insert(pid, child);
        Ok(pid)
    }

    async fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        send_signal(pid, Signal::SIGTERM)
    }

    async fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        send_signal(pid, Signal::SIGKILL)
    }

    fn is_alive(&self, pid: u32) -> bool {
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }
}

fn send_signal(pid: u32, sig: Signal) -> Result<(), ProcessError> {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => Ok(()),
        // Already gone: terminate/kill are idempotent, not errors.
        Err(nix::Error::ESRCH) => Ok(()),
        Err(source) => Err(ProcessError::Signal { pid, source }),
    }
}

/// Scan `/proc` for processes whose executable path matches one of ours,
/// left over from a previous run that did not shut down cleanly. Matching
/// by executable path (rather than a pidfile) survives a crashed
/// orchestrator that never wrote one.
pub fn find_orphans(exe_path: &Path) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else { return Vec::new() };
    let mut orphans = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let link = entry.path().join("exe");
        if let Ok(target) = std::fs::read_link(&link) {
            if target == exe_path {
                orphans.push(pid);
            }
        }
    }
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_orphans_on_a_path_nothing_runs_from_is_empty() {
        let orphans = find_orphans(Path::new("/nonexistent/binary/path"));
        assert!(orphans.is_empty());
    }

    #[tokio::test]
    async fn terminating_a_dead_pid_is_not_an_error() {
        let launcher = SystemLauncher::default();
        // A pid this large is exceedingly unlikely to be live.
        launcher.terminate(1).await.ok();
        assert!(launcher.kill(999_999).await.is_ok());
    }
}
