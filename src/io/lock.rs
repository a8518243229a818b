//! Single-instance enforcement.
//!
//! The daemon holds an exclusive `flock` on `nightlight.lock` in the runtime
//! directory for its whole lifetime. The kernel drops the lock when the process
//! dies, so a lock file left behind by a crash never blocks the next start.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::constants::LOCK_FILE_NAME;

/// Held for as long as this process is the running daemon.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Lock file in the runtime directory.
    pub fn default_path() -> PathBuf {
        crate::io::runtime_dir().join(LOCK_FILE_NAME)
    }

    /// Take the lock, recording our PID in the file.
    ///
    /// Fails with the holder's PID when another instance is running.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        // Never truncate before the lock is ours: the holder's PID lives there.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            let holder = std::fs::read_to_string(path).unwrap_or_default();
            match holder.trim().parse::<u32>() {
                Ok(pid) => anyhow::bail!("nightlight is already running (PID: {pid})"),
                Err(_) => anyhow::bail!("nightlight is already running"),
            }
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        let _ = FileExt::unlock(&self.file);
    }
}
