//! Shared per-session results log (`AllResults.csv`)
//!
//! The log is kept read-only between appends so other tooling cannot
//! clobber finished results. [`SummaryLog::append`] lifts the protection
//! for the duration of a single write and restores it afterwards, also
//! when the write fails.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::types::{SummaryRecord, SUMMARY_HEADER};

/// Append-only summary log with read-only protection between writes.
#[derive(Debug, Clone)]
pub struct SummaryLog {
    path: PathBuf,
}

impl SummaryLog {
    /// Open the log at `path`, creating it with a header if missing.
    ///
    /// A log left writable by an earlier crash is made read-only again.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let log = Self {
            path: path.as_ref().to_path_buf(),
        };
        log.ensure_exists()?;
        if let Err(e) = set_read_only(&log.path, true) {
            tracing::warn!(path = ?log.path, "Could not protect summary log: {:#}", e);
        }
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_exists(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let mut file = fs::File::create(&self.path)
            .with_context(|| format!("Failed to create summary log {:?}", self.path))?;
        writeln!(file, "{SUMMARY_HEADER}")?;
        tracing::info!(path = ?self.path, "Created summary log");
        Ok(())
    }

    /// Append one session summary.
    pub fn append(&self, record: &SummaryRecord) -> Result<()> {
        self.ensure_exists()?;
        let _writable = WritableGuard::lift(&self.path)?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open summary log {:?}", self.path))?;
        writeln!(file, "{}", record.to_csv_line())
            .with_context(|| format!("Failed to append to summary log {:?}", self.path))?;
        file.sync_all()?;

        tracing::info!(
            experiment_id = %record.experiment_id,
            path = ?self.path,
            "Summary row appended"
        );
        Ok(())
    }
}

/// Keeps a file writable while alive; read-only again on drop.
struct WritableGuard<'a> {
    path: &'a Path,
}

impl<'a> WritableGuard<'a> {
    fn lift(path: &'a Path) -> Result<Self> {
        set_read_only(path, false)?;
        Ok(Self { path })
    }
}

impl Drop for WritableGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = set_read_only(self.path, true) {
            tracing::warn!(path = ?self.path, "Summary log left writable: {:#}", e);
        }
    }
}

/// Whether the owner write bit (or the platform read-only flag) is cleared.
pub fn is_read_only(path: &Path) -> Result<bool> {
    let meta = fs::metadata(path).with_context(|| format!("Failed to stat {:?}", path))?;
    Ok(meta.permissions().readonly())
}

#[cfg(unix)]
fn set_read_only(path: &Path, read_only: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)
        .with_context(|| format!("Failed to stat {:?}", path))?
        .permissions();
    let mode = perms.mode();
    perms.set_mode(if read_only { mode & !0o222 } else { mode | 0o200 });
    fs::set_permissions(path, perms).with_context(|| format!("Failed to chmod {:?}", path))
}

#[cfg(not(unix))]
fn set_read_only(path: &Path, read_only: bool) -> Result<()> {
    let mut perms = fs::metadata(path)
        .with_context(|| format!("Failed to stat {:?}", path))?
        .permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(read_only);
    fs::set_permissions(path, perms).with_context(|| format!("Failed to set attributes on {:?}", path))
}
