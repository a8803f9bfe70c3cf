//! Single-instance guard for sync passes.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::process::Command;
use std::time::Duration;

use crate::error::{Error, Result};

/// A lock file that exists for as long as the guard is alive. The file
/// holds the owner's pid for diagnostics.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Lock file next to the sync database.
    pub fn path_for(db_path: &Path) -> PathBuf {
        db_path.with_extension("lock")
    }

    /// Take the lock at `path`. A lock left behind by a process that no
    /// longer exists is removed and taken over.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = match create_lock_file(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists && is_stale(&path) => {
                log::warn!(
                    "Removing stale lock file {} (holder {:?} is gone)",
                    path.display(),
                    Self::holder_pid(&path)
                );
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(Error::Other(format!(
                            "cannot remove stale lock file {}: {e}",
                            path.display()
                        )))
                    }
                }
                create_lock_file(&path).map_err(|e| lock_error(&path, e))?
            }
            Err(e) => return Err(lock_error(&path, e)),
        };
        // The lock is already held at this point; a failed pid write only
        // loses diagnostics.
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            log::debug!("Could not write pid to {}: {e}", path.display());
        }
        log::debug!("Acquired run lock {}", path.display());
        Ok(Self { path })
    }

    /// Whether a live process holds the lock. Stale files do not count.
    pub fn is_held(path: &Path) -> bool {
        path.exists() && !is_stale(path)
    }

    /// Pid recorded by the current holder, if readable.
    pub fn holder_pid(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create_lock_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create_new(true).write(true).open(path)
}

fn lock_error(path: &Path, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::AlreadyExists {
        Error::AlreadyRunning(path.to_path_buf())
    } else {
        Error::Other(format!("cannot create lock file {}: {e}", path.display()))
    }
}

/// A lock is stale when its recorded holder is dead. Without a readable
/// pid it is only stale once it has sat untouched for a while, so a lock
/// whose pid has not been written yet is left alone.
fn is_stale(path: &Path) -> bool {
    match RunLock::holder_pid(path) {
        Some(pid) => pid != std::process::id() && !process_alive(pid),
        None => fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .is_some_and(|age| age > UNREADABLE_LOCK_GRACE),
    }
}

const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(60);

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if proc_root.join("self").exists() {
        return proc_root.join(pid.to_string()).exists();
    }
    // No procfs (macOS): `kill -0` checks without sending a signal. EPERM
    // still means the process exists.
    match Command::new("kill").arg("-0").arg(pid.to_string()).output() {
        Ok(out) if out.status.success() => true,
        Ok(out) => String::from_utf8_lossy(&out.stderr)
            .to_lowercase()
            .contains("not permitted"),
        Err(e) => {
            log::debug!("Could not check pid {pid}: {e}");
            true
        }
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to remove lock file {}: {e}", self.path.display());
        }
    }
}
