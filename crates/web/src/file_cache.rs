//! Shared file-content cache.
//!
//! The cache is the one object shared by every connection; the map
//! provides its own synchronization. Entries carry the file bytes plus
//! the validators conditional requests compare against. `open` re-stats a
//! hit and reloads when the file changed on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use httpdate::fmt_http_date;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum CacheError {
    /// The file is larger than the caller's cap; recoverable by streaming
    /// it instead.
    #[error("file size {size} over cache limit {limit}")]
    OverLimit { size: u64, limit: u64 },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// How to open a file through the cache.
#[derive(Debug, Clone, Copy)]
pub struct OpenParam {
    /// Files larger than this are refused with [`CacheError::OverLimit`].
    pub max_read: u64,
    /// Whether the content bytes are needed at all (HEAD requests are
    /// satisfied by metadata alone).
    pub need_read: bool,
}

/// One cached file: content plus validators.
#[derive(Debug)]
pub struct FileCacheEntry {
    pub path: PathBuf,
    pub content: Bytes,
    pub size: u64,
    pub modified: SystemTime,
    pub etag: String,
    pub last_modified: String,
    pub content_type: String,
}

pub struct FileCache {
    entries: DashMap<PathBuf, Arc<FileCacheEntry>>,
}

impl FileCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Opens a file through the cache: a fresh hit is returned as-is, a
    /// stale or missing entry is (re)loaded from disk.
    pub async fn open(&self, path: &Path, param: &OpenParam) -> Result<Arc<FileCacheEntry>, CacheError> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::from(std::io::ErrorKind::NotFound).into());
        }

        let size = metadata.len();
        if param.need_read && size > param.max_read {
            return Err(CacheError::OverLimit { size, limit: param.max_read });
        }
        let modified = metadata.modified()?;

        if let Some(entry) = self.entries.get(path) {
            let fresh = entry.modified == modified
                && entry.size == size
                && (!param.need_read || entry.content.len() as u64 == size);
            if fresh {
                trace!(path = %path.display(), "file cache hit");
                return Ok(entry.clone());
            }
        }

        let content = if param.need_read {
            Bytes::from(tokio::fs::read(path).await?)
        } else {
            Bytes::new()
        };

        let entry = Arc::new(FileCacheEntry {
            path: path.to_path_buf(),
            content,
            size,
            modified,
            etag: make_etag(modified, size),
            last_modified: fmt_http_date(modified),
            content_type: content_type_for(path),
        });

        debug!(path = %path.display(), size, "file cache load");
        self.entries.insert(path.to_path_buf(), entry.clone());
        Ok(entry)
    }

    /// Releases an entry: the next open reloads it from disk.
    pub fn close(&self, entry: &FileCacheEntry) {
        self.entries.remove(&entry.path);
    }
}

impl Default for FileCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Dropped after the response ships; oversized entries are released back
/// so the cache does not pin large files in memory.
pub(crate) struct ReleaseOnSent {
    pub(crate) cache: Arc<FileCache>,
    pub(crate) entry: Arc<FileCacheEntry>,
}

impl Drop for ReleaseOnSent {
    fn drop(&mut self) {
        self.cache.close(&self.entry);
    }
}

fn make_etag(modified: SystemTime, size: u64) -> String {
    let mtime = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format!("\"{mtime:x}-{size:x}\"")
}

fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[tokio::test]
    async fn hit_returns_same_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "index.html", b"<html>hello</html>");

        let cache = FileCache::new();
        let param = OpenParam { max_read: 1024, need_read: true };

        let first = cache.open(&path, &param).await.unwrap();
        let second = cache.open(&path, &param).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert_eq!(&first.content[..], b"<html>hello</html>");
        assert_eq!(first.content_type, "text/html");
        assert!(first.etag.starts_with('"') && first.etag.ends_with('"'));
    }

    #[tokio::test]
    async fn over_limit_is_recoverable_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "big.bin", &[0u8; 64]);

        let cache = FileCache::new();

        // size == max_read stays cacheable, one byte more is over
        let at_cap = cache.open(&path, &OpenParam { max_read: 64, need_read: true }).await;
        assert!(at_cap.is_ok());

        let over = cache.open(&path, &OpenParam { max_read: 63, need_read: true }).await;
        assert!(matches!(over, Err(CacheError::OverLimit { size: 64, limit: 63 })));
    }

    #[tokio::test]
    async fn head_open_reads_no_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "page.html", b"<p>body</p>");

        let cache = FileCache::new();
        let entry = cache.open(&path, &OpenParam { max_read: 1024, need_read: false }).await.unwrap();
        assert!(entry.content.is_empty());
        assert_eq!(entry.size, 11);

        // a later GET must not be served the empty metadata entry
        let entry = cache.open(&path, &OpenParam { max_read: 1024, need_read: true }).await.unwrap();
        assert_eq!(&entry.content[..], b"<p>body</p>");
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new();
        let result = cache.open(&dir.path().join("nope.txt"), &OpenParam { max_read: 16, need_read: true }).await;
        assert!(matches!(result, Err(CacheError::Io { .. })));
    }

    #[tokio::test]
    async fn close_releases_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a.txt", b"aaa");

        let cache = FileCache::new();
        let param = OpenParam { max_read: 1024, need_read: true };
        let first = cache.open(&path, &param).await.unwrap();
        cache.close(&first);

        let second = cache.open(&path, &param).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
