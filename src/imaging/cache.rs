use crate::error::{ResizerError, Result};
use md5::{Digest, Md5};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const CACHE_EXTENSION: &str = "jpg";

/// On-disk store of encoded variants, bounded by file count
#[derive(Debug, Clone)]
pub struct ImageCache {
    dir: PathBuf,
    max_files: usize,
}

impl ImageCache {
    pub fn new<P: AsRef<Path>>(dir: P, max_files: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_files,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for one rendition of `source`
    pub fn key(source: &Path, width: Option<u32>, height: Option<u32>, quality: u8) -> String {
        let dim = |d: Option<u32>| d.map(|v| v.to_string()).unwrap_or_else(|| "auto".to_string());
        format!(
            "{}_{}_{}_{}",
            source.display(),
            dim(width),
            dim(height),
            quality
        )
    }

    /// File that holds the entry for `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = Md5::digest(key.as_bytes());
        self.dir.join(format!("{:x}.{}", digest, CACHE_EXTENSION))
    }

    /// Cached bytes for `key`, if present
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => {
                debug!("Cache hit: {}", path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ResizerError::CacheError(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Store `bytes` under `key`, then enforce the file bound
    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            ResizerError::CacheError(format!(
                "Failed to create cache directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        // Each writer gets its own temp file; the rename publishes it whole
        let path = self.path_for(key);
        let write_err = |e: std::io::Error| {
            ResizerError::CacheError(format!("Failed to write {}: {}", path.display(), e))
        };
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;
        debug!("Cached {} bytes at {}", bytes.len(), path.display());

        self.cleanup()?;
        Ok(path)
    }

    /// Entries currently in the cache with their modification times
    fn entries(&self) -> Result<Vec<(PathBuf, SystemTime)>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CACHE_EXTENSION) {
                continue;
            }
            // Entries can vanish between listing and stat
            match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => entries.push((path, modified)),
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(entries)
    }

    /// Number of cached entries
    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete the oldest entries until at most `max_files` remain.
    /// Returns how many were removed.
    pub fn cleanup(&self) -> Result<usize> {
        let mut entries = self.entries()?;
        if entries.len() <= self.max_files {
            return Ok(0);
        }

        entries.sort_by_key(|(_, modified)| *modified);
        let excess = entries.len() - self.max_files;

        let mut removed = 0;
        for (path, _) in entries.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to evict {}: {}", path.display(), e),
            }
        }

        info!(
            "Evicted {} cached file(s) from {}",
            removed,
            self.dir.display()
        );
        Ok(removed)
    }
}
