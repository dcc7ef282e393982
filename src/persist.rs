//! File primitives shared by the playlist, the control state and the
//! spectral cache: atomic replacement and advisory locking.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Replace `path` with `contents` so readers see either the old file or the
/// new one, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Advisory lock held on a sidecar `.<name>.lock` file next to the guarded
/// file. Data files are replaced by rename, so the lock cannot live on the
/// data file itself.
pub struct FileLock {
    file: File,
}

impl FileLock {
    pub fn lock_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.lock", name.trim_start_matches('.')))
    }

    fn open(path: &Path) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(Self::lock_path(path))
    }

    /// Shared lock for readers; blocks while a writer holds the exclusive lock.
    pub fn shared(path: &Path) -> std::io::Result<Self> {
        let file = Self::open(path)?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    pub fn exclusive(path: &Path) -> std::io::Result<Self> {
        let file = Self::open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
