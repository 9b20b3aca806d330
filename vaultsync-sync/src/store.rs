//! Local copy of the secret.
//!
//! ## `write` — atomic replace protocol
//!
//! 1. Check the target directory exists (it is never created).
//! 2. Remove any stale `.<name>.vaultsync.tmp` left by a crash.
//! 3. Create the temp file with the configured mode and write the bytes.
//! 4. fsync the temp file.
//! 5. Rename over `<dir>/<name>` (atomic on POSIX; same directory, so the
//!    same filesystem).
//! 6. Re-apply the mode to the final path.
//!
//! Any failure before step 5 removes the temp file and leaves the previous
//! copy untouched, so a concurrent reader sees either the old or the new
//! content, never a mix.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use vaultsync_core::SecretName;

use crate::error::{io_err, SyncError};

/// Reads and atomically replaces `<directory>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStateStore {
    directory: PathBuf,
    name: String,
    mode: u32,
}

impl LocalStateStore {
    pub fn new(directory: impl Into<PathBuf>, name: &SecretName, mode: u32) -> Self {
        Self {
            directory: directory.into(),
            name: name.as_str().to_owned(),
            mode,
        }
    }

    /// Final path of the synced file.
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.name)
    }

    fn tmp_path(&self) -> PathBuf {
        self.directory.join(format!(".{}.vaultsync.tmp", self.name))
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Current content of the local copy; `None` if it does not exist yet.
    pub fn read(&self) -> Result<Option<Vec<u8>>, SyncError> {
        let path = self.path();
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(path, err)),
        }
    }

    /// Atomically replace the local copy with `bytes`.
    pub fn write(&self, bytes: &[u8]) -> Result<(), SyncError> {
        self.write_with_tmp(bytes, &self.tmp_path())
    }

    fn write_with_tmp(&self, bytes: &[u8], tmp: &Path) -> Result<(), SyncError> {
        // Step 1: the directory is owned by the pod spec, not by us.
        let meta = fs::metadata(&self.directory).map_err(|e| io_err(&self.directory, e))?;
        if !meta.is_dir() {
            return Err(io_err(
                &self.directory,
                std::io::Error::new(ErrorKind::NotFound, "target is not a directory"),
            ));
        }

        // Step 2: stale temp file from an interrupted write.
        match fs::remove_file(tmp) {
            Ok(()) => tracing::debug!(path = %tmp.display(), "removed stale temp file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(tmp, err)),
        }

        // Steps 3-4.
        if let Err(err) = write_tmp(tmp, bytes, self.mode) {
            let _ = fs::remove_file(tmp);
            return Err(io_err(tmp, err));
        }

        // Step 5.
        let path = self.path();
        if let Err(err) = fs::rename(tmp, &path) {
            let _ = fs::remove_file(tmp);
            return Err(io_err(&path, err));
        }

        // Step 6: rename keeps the temp file's mode, this guards against umask.
        set_mode(&path, self.mode).map_err(|e| io_err(&path, e))?;
        sync_dir(&self.directory);
        Ok(())
    }
}

fn write_tmp(tmp: &Path, bytes: &[u8], mode: u32) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let mut file = options.open(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    set_mode(tmp, mode)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Best-effort fsync of the directory so the rename survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(path = %dir.display(), error = %err, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Short SHA-256 fingerprint of secret content, safe to log.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let mut digest = hex::encode(h.finalize());
    digest.truncate(12);
    digest
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
