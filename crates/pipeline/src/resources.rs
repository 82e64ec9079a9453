//! Per-run resource bookkeeping.
//!
//! The orchestrator owns one [`ResourceTracker`] per pipeline run. Anything
//! that outlives a phase (temporary files, spawned child pids) is registered
//! here and released by [`ResourceTracker::cleanup`] on both the success and
//! failure paths.

use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct ResourceTracker {
    temp_paths: Mutex<Vec<PathBuf>>,
    pids: Mutex<Vec<u32>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_temp_path(&self, path: impl Into<PathBuf>) {
        if let Ok(mut paths) = self.temp_paths.lock() {
            paths.push(path.into());
        }
    }

    pub fn register_pid(&self, pid: u32) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.push(pid);
        }
    }

    /// Forget a pid whose process has been reaped.
    pub fn unregister_pid(&self, pid: u32) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.retain(|p| *p != pid);
        }
    }

    pub fn tracked_temp_paths(&self) -> Vec<PathBuf> {
        self.temp_paths.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn tracked_pids(&self) -> Vec<u32> {
        self.pids.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Remove registered paths and SIGTERM registered pids that are still
    /// alive. Failures are logged and swallowed.
    pub async fn cleanup(&self) {
        let paths = self
            .temp_paths
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default();
        let pids = self
            .pids
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default();

        for path in paths {
            let result = match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary path");
            }
        }

        for pid in pids {
            if !process_alive(pid) {
                continue;
            }
            tracing::warn!(pid, "Terminating leftover child process");
            if let Err(e) = send_signal(pid, libc::SIGTERM) {
                tracing::warn!(pid, error = %e, "Failed to terminate child process");
            }
        }
    }
}

/// Signal 0 checks for existence without delivering anything.
fn process_alive(pid: u32) -> bool {
    send_signal(pid, 0).is_ok()
}

fn send_signal(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // Safety: kill(2) has no memory-safety preconditions.
    let ret = unsafe { libc::kill(pid, signal) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
