//! Decrypted binary cache
//!
//! A plaintext image is stored next to the per-title data and stamped with
//! the source file's access and modification times, as observed when the
//! source was opened. The entry is trusted only while those still match.

use std::fs::{self, File, FileTimes, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Timestamps of a protected source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceTimes {
    pub modified: SystemTime,
    pub accessed: SystemTime,
}

impl SourceTimes {
    /// Times recorded in `meta`; a missing access time falls back to the modification time
    pub fn of(meta: &Metadata) -> io::Result<Self> {
        let modified = meta.modified()?;
        Ok(Self {
            modified,
            accessed: meta.accessed().unwrap_or(modified),
        })
    }

    pub fn of_path(path: &Path) -> io::Result<Self> {
        Self::of(&fs::metadata(path)?)
    }
}

/// Cache of decrypted executables inside one cache directory
#[derive(Debug, Clone)]
pub struct DecryptedCache {
    dir: PathBuf,
}

impl DecryptedCache {
    /// File name of the cached plaintext image
    pub const FILE_NAME: &'static str = "boot.elf";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the cached plaintext
    pub fn plaintext_path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }

    /// Cached plaintext for a source with times `source`, if it is still valid
    pub fn get(&self, source: &SourceTimes) -> Option<PathBuf> {
        let path = self.plaintext_path();
        let meta = fs::metadata(&path).ok()?;
        if !meta.is_file() {
            debug!("Cached plaintext {:?} is not a file", path);
            return None;
        }

        if meta.modified().ok()? == source.modified {
            debug!("Using cached plaintext {:?}", path);
            Some(path)
        } else {
            debug!("Cached plaintext {:?} is stale", path);
            None
        }
    }

    /// Persist `plaintext` and stamp it with the source's times
    pub fn put(&self, source: &SourceTimes, plaintext: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.plaintext_path();

        let mut file = File::create(&path)?;
        file.write_all(plaintext)?;
        file.set_times(
            FileTimes::new()
                .set_accessed(source.accessed)
                .set_modified(source.modified),
        )?;

        debug!("Cached {} bytes of plaintext at {:?}", plaintext.len(), path);
        Ok(path)
    }
}
