//! Advisory per-base-dir lock preventing two concurrent invocations over the
//! same working area (§5). One lock file per base-dir, holding `pid:timestamp`;
//! a holder that's dead and older than [`STALE_LOCK_AGE_SECS`] is reclaimed.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::LockError;

const STALE_LOCK_AGE_SECS: u64 = 300;

/// An exclusive lock on one base-dir's orchestrator state. Released when
/// dropped.
#[derive(Debug)]
pub struct BaseDirLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl BaseDirLock {
    /// Acquire the lock for `base_dir`, creating `<base_dir>/.gitnetics/` if
    /// needed. Reclaims a stale lock (dead holder, past the age threshold)
    /// automatically before retrying once.
    pub fn acquire(base_dir: &Path) -> Result<Self> {
        let state_dir = base_dir.join(".gitnetics");
        if !state_dir.exists() {
            fs::create_dir_all(&state_dir)
                .with_context(|| format!("failed to create {state_dir:?}"))?;
        }
        let lock_path = state_dir.join("gitnetics.lock");

        match Self::try_acquire(&lock_path) {
            Ok(lock) => Ok(lock),
            Err(first_error) => {
                if Self::is_stale(&lock_path)? {
                    let _ = fs::remove_file(&lock_path);
                    Self::try_acquire(&lock_path)
                } else {
                    Err(first_error)
                }
            }
        }
    }

    fn try_acquire(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(lock_path)
            .with_context(|| format!("failed to open lock file {lock_path:?}"))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut handle = file.try_clone()?;
                let timestamp = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                writeln!(handle, "{}:{}", std::process::id(), timestamp)?;
                Ok(Self {
                    file,
                    path: lock_path.to_path_buf(),
                })
            }
            Err(_) => {
                let holder_info = fs::read_to_string(lock_path).unwrap_or_default();
                let holder_pid = holder_info
                    .split(':')
                    .next()
                    .and_then(|s| s.trim().parse().ok());
                Err(LockError::Held {
                    base_dir: lock_path
                        .parent()
                        .and_then(|p| p.parent())
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    holder_pid,
                }
                .into())
            }
        }
    }

    fn is_stale(lock_path: &Path) -> Result<bool> {
        if !lock_path.exists() {
            return Ok(false);
        }
        let content = fs::read_to_string(lock_path).unwrap_or_default();
        let mut parts = content.trim().split(':');
        let holder_pid: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let lock_timestamp: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);

        if holder_pid == 0 {
            return Ok(false);
        }
        if is_process_running(holder_pid) {
            return Ok(false);
        }
        if lock_timestamp > 0 {
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if now.saturating_sub(lock_timestamp) < STALE_LOCK_AGE_SECS {
                return Ok(false);
            }
        }
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn read_content(&self) -> Result<String> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        Ok(content)
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

impl Drop for BaseDirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_and_release() -> Result<()> {
        let dir = tempdir()?;
        let lock_path = dir.path().join(".gitnetics").join("gitnetics.lock");

        let lock = BaseDirLock::acquire(dir.path())?;
        assert!(lock_path.exists());
        drop(lock);
        assert!(!lock_path.exists());
        Ok(())
    }

    #[test]
    fn second_acquisition_fails() -> Result<()> {
        let dir = tempdir()?;
        let _lock1 = BaseDirLock::acquire(dir.path())?;
        let result = BaseDirLock::acquire(dir.path());
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn lock_contains_pid() -> Result<()> {
        let dir = tempdir()?;
        let lock = BaseDirLock::acquire(dir.path())?;
        let content = lock.read_content()?;
        assert!(content.contains(&std::process::id().to_string()));
        Ok(())
    }

    #[test]
    fn released_lock_allows_new_acquisition() -> Result<()> {
        let dir = tempdir()?;
        {
            let _lock = BaseDirLock::acquire(dir.path())?;
        }
        assert!(BaseDirLock::acquire(dir.path()).is_ok());
        Ok(())
    }
}
