//! Machine-wide named lock guarding the durable token store
//!
//! The lock is an advisory exclusive lock on a file named after the resource,
//! created world read/write in a directory every local user shares, so that
//! any of them can take it. Every
//! acquisition opens its own file description, which makes two acquisitions in
//! the same process exclude each other just like two processes do.
//!
//! The lock is released when the [`NamedLockGuard`] is dropped, including on
//! error and panic paths; the OS also releases it if the process dies.

use super::error::{ProviderError, ProviderResult};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Mode of the lock file: any local user may open and lock it
#[cfg(unix)]
const LOCK_FILE_MODE: u32 = 0o666;

/// A named, system-wide mutual exclusion primitive
#[derive(Debug, Clone)]
pub struct NamedLock {
    name: String,
    path: PathBuf,
}

impl NamedLock {
    /// Lock visible to every process on the machine, kept in [`shared_lock_dir`]
    pub fn new(name: impl Into<String>) -> Self {
        Self::in_dir(shared_lock_dir(), name)
    }

    /// Lock whose file lives in `dir`
    pub fn in_dir(dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = dir.as_ref().join(format!("{name}.lock"));
        Self { name, path }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is owned.
    ///
    /// There is no timeout; the wait happens on the blocking thread pool so the
    /// async runtime keeps running.
    pub async fn acquire(&self) -> ProviderResult<NamedLockGuard> {
        let path = self.path.clone();
        debug!("Waiting for process lock {}", self.name);

        let file = tokio::task::spawn_blocking(move || -> io::Result<File> {
            let file = open_lock_file(&path)?;
            lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(|e| ProviderError::Lock(format!("Lock task failed: {e}")))?
        .map_err(|e| {
            ProviderError::Lock(format!(
                "Failed to lock '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        info!("Acquired process lock {}", self.name);
        Ok(NamedLockGuard {
            name: self.name.clone(),
            file: Some(file),
        })
    }
}

/// Ownership of a [`NamedLock`]; dropping it releases the lock
#[derive(Debug)]
pub struct NamedLockGuard {
    name: String,
    file: Option<File>,
}

impl NamedLockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release explicitly. Dropping the guard does the same.
    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = unlock(&file) {
                // Closing the descriptor below releases it anyway.
                warn!("Failed to unlock process lock {}: {}", self.name, e);
            }
            debug!("Released process lock {}", self.name);
        }
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Directory shared by every local user.
///
/// The system temp dir on Unix; `%ProgramData%` elsewhere, since the Windows
/// temp dir is per user.
pub fn shared_lock_dir() -> PathBuf {
    #[cfg(unix)]
    {
        std::env::temp_dir()
    }
    #[cfg(not(unix))]
    {
        std::env::var_os("ProgramData")
            .map(|dir| PathBuf::from(dir).join("cloudid"))
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Open the lock file, creating it only when missing.
///
/// An existing file is opened without `O_CREAT`: in sticky world-writable
/// directories `fs.protected_regular` refuses creating opens of files owned by
/// other users.
fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    loop {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => {
                debug!("Created lock file {}", path.display());
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    // Undo the umask so other users can open it later.
                    file.set_permissions(std::fs::Permissions::from_mode(LOCK_FILE_MODE))?;
                }
                return Ok(file);
            }
            // Another process created it first; open theirs.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn lock_exclusive(file: &File) -> io::Result<()> {
    file.lock()
}

#[cfg(not(unix))]
fn unlock(file: &File) -> io::Result<()> {
    file.unlock()
}
