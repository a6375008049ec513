//! Output directory lock
//!
//! Two collectors writing the same summary log would interleave rows and
//! fight over its read-only bit. The first collector to start in a directory
//! writes its PID to `.collector.lock`; later ones refuse to start.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// PID lock on an output directory, released on drop.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    held: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".collector.lock";

    /// Take the lock for `data_dir`, creating the directory if needed.
    ///
    /// A lock left behind by a collector that is no longer running is
    /// replaced.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create output directory {:?}", data_dir))?;

        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);

        if lock_path.exists() {
            match Self::holder(&lock_path) {
                Ok(Some(pid)) => bail!(
                    "Another collector (PID {}) is writing to {:?}; stop it or remove {:?}",
                    pid,
                    data_dir,
                    lock_path
                ),
                Ok(None) => {
                    tracing::info!(path = ?lock_path, "Replacing stale collector lock");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
                Err(e) => {
                    tracing::warn!("Unreadable lock file {:?}: {:#}", lock_path, e);
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to create lock file {:?}", lock_path))?;
        writeln!(file, "{}", pid).context("Failed to write PID to lock file")?;

        tracing::debug!(pid, path = ?lock_path, "Output directory locked");
        Ok(Self {
            lock_path,
            held: true,
        })
    }

    /// PID of a live collector holding the lock, if any.
    fn holder(lock_path: &Path) -> Result<Option<u32>> {
        let contents = fs::read_to_string(lock_path).context("Failed to read lock file")?;
        let pid: u32 = contents
            .trim()
            .parse()
            .context("Lock file does not contain a PID")?;
        Ok(Self::is_collector_running(pid).then_some(pid))
    }

    #[cfg(unix)]
    fn is_collector_running(pid: u32) -> bool {
        match fs::read_to_string(format!("/proc/{}/cmdline", pid)) {
            Ok(cmdline) => cmdline.contains("tc66-collector") || cmdline.contains("tc66_collector"),
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn is_collector_running(_pid: u32) -> bool {
        true
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Remove the lock file. Called on drop.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        match fs::remove_file(&self.lock_path) {
            Ok(()) => tracing::debug!(path = ?self.lock_path, "Output directory unlocked"),
            Err(e) => tracing::warn!("Failed to remove lock file: {}", e),
        }
        self.held = false;
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}
