//! Data directory lock
//!
//! Two engines appending to the same durable logs would interleave rows and
//! duplicate headers. The lock file holds the owning PID; a lock whose PID no
//! longer belongs to a gantry-edge process is considered stale.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Exclusive claim on a data directory, released on drop.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    const LOCK_FILE_NAME: &'static str = ".gantry-edge.lock";

    /// Claim `data_dir`, creating it if needed.
    ///
    /// Fails if a live engine already holds the lock.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();

        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let lock_path = data_dir.join(Self::LOCK_FILE_NAME);

        if lock_path.exists() {
            match Self::check_existing_lock(&lock_path) {
                Ok(Some(pid)) => {
                    bail!(
                        "Another gantry-edge instance is already logging to {:?} (PID: {})\n\
                         \n\
                         Stop the other instance, or remove the stale lock file:\n\
                            rm {:?}",
                        data_dir,
                        pid,
                        lock_path
                    );
                }
                Ok(None) => {
                    tracing::info!(path = ?lock_path, "Removing stale lock file");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable lock file, replacing it");
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        let mut file =
            File::create(&lock_path).with_context(|| format!("Failed to create lock file: {:?}", lock_path))?;
        writeln!(file, "{}", pid).context("Failed to write PID to lock file")?;

        tracing::debug!(pid, path = ?lock_path, "Acquired data directory lock");

        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    /// `Ok(Some(pid))` if a live engine holds the lock, `Ok(None)` if stale.
    fn check_existing_lock(lock_path: &Path) -> Result<Option<u32>> {
        let mut contents = String::new();
        File::open(lock_path)
            .context("Failed to open existing lock file")?
            .read_to_string(&mut contents)
            .context("Failed to read lock file contents")?;

        let pid: u32 = contents.trim().parse().context("Failed to parse PID from lock file")?;

        Ok(Self::is_engine_running(pid).then_some(pid))
    }

    #[cfg(unix)]
    fn is_engine_running(pid: u32) -> bool {
        // A recycled PID belonging to another program does not count.
        fs::read_to_string(format!("/proc/{}/cmdline", pid))
            .map(|cmdline| cmdline.contains("gantry-edge") || cmdline.contains("gantry_edge"))
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_engine_running(_pid: u32) -> bool {
        true
    }

    /// Remove the lock file. Called on drop.
    pub fn release(&mut self) {
        if self.owned {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                tracing::warn!(error = %e, "Failed to remove lock file");
            } else {
                tracing::debug!(path = ?self.lock_path, "Released data directory lock");
            }
            self.owned = false;
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_writes_pid() {
        let temp_dir = tempdir().unwrap();
        let lock = ProcessLock::acquire(temp_dir.path().join("data")).unwrap();

        assert!(lock.path().exists());
        let pid: u32 = fs::read_to_string(lock.path()).unwrap().trim().parse().unwrap();
        assert_eq!(pid, std::process::id());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp_dir = tempdir().unwrap();
        let lock_path = {
            let lock = ProcessLock::acquire(temp_dir.path()).unwrap();
            lock.path().to_path_buf()
        };
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_stale_lock_removed() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(ProcessLock::LOCK_FILE_NAME), "999999999\n").unwrap();

        let lock = ProcessLock::acquire(temp_dir.path()).unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn test_garbage_lock_replaced() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(ProcessLock::LOCK_FILE_NAME), "not a pid").unwrap();

        assert!(ProcessLock::acquire(temp_dir.path()).is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_second_instance_rejected() {
        // The test binary itself is named after the crate, so it counts as a live engine.
        let temp_dir = tempdir().unwrap();
        let _first = ProcessLock::acquire(temp_dir.path()).unwrap();
        assert!(ProcessLock::acquire(temp_dir.path()).is_err());
    }
}
