/**
 * The virtual filesystem capability (spec §4.1).
 *
 * Modeled as a single trait so the HTTP layer and the copy/move
 * planner stay polymorphic over it (design note d): a Postgres-backed
 * implementation (`PgVfs`) and an in-memory one (`MemVfs`) both
 * implement it, the latter used by tests that don't want a database.
 */
use crate::common::errors::VfsError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Metadata for a single resource, file or directory (spec §4.1 `stat`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub is_file: bool,
    pub is_directory: bool,
    pub size: u64,
    /// ms since epoch, last modification.
    pub mtime_ms: i64,
    /// ms since epoch, creation / birthtime. For implicit directories
    /// this is `min(created_at)` over descendants (spec §9, note c).
    pub ctime_ms: i64,
    /// Present for files only.
    pub etag: Option<String>,
}

impl Stat {
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }
}

/// A single entry produced by `readdir` (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Name relative to the directory being listed (no slashes, except
    /// that directory names carry no trailing slash here either — the
    /// caller appends one when rendering a WebDAV href).
    pub name: String,
    /// Normalized absolute path of the containing directory.
    pub parent: String,
    pub is_file: bool,
    pub is_directory: bool,
}

impl DirEntry {
    /// Full normalized path of this entry.
    pub fn path(&self) -> String {
        if self.parent == "/" {
            format!("/{}", self.name)
        } else {
            format!("{}/{}", self.parent, self.name)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReaddirOptions {
    pub recursive: bool,
}

pub type ReadStream = Pin<Box<dyn Stream<Item = Result<Bytes, VfsError>> + Send>>;

/// The filesystem contract of spec §4.1. Every method takes paths
/// already accepted as-is by the caller; implementations normalize on
/// entry.
#[async_trait]
pub trait Vfs: Send + Sync {
    async fn stat(&self, path: &str) -> Result<Stat, VfsError>;

    /// Succeeds iff `stat(path)` succeeds.
    async fn access(&self, path: &str) -> Result<(), VfsError> {
        self.stat(path).await.map(|_| ())
    }

    /// Creates an explicit directory row. When `recursive` is true,
    /// missing ancestors are created implicitly and EEXIST is
    /// tolerated; returns the created path. When false, the immediate
    /// parent must already resolve as a directory.
    async fn mkdir(&self, path: &str, recursive: bool) -> Result<Option<String>, VfsError>;

    async fn write_file(&self, path: &str, content: Bytes) -> Result<(), VfsError>;

    async fn read_file(&self, path: &str) -> Result<Bytes, VfsError>;

    /// A finite, non-restartable lazy byte sequence, chunked at
    /// `chunk_size` bytes per round trip (spec §4.1, §4.4, §9).
    async fn create_read_stream(&self, path: &str, chunk_size: usize) -> Result<ReadStream, VfsError>;

    async fn readdir(&self, path: &str, opts: ReaddirOptions) -> Result<Vec<DirEntry>, VfsError>;

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), VfsError>;

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), VfsError>;

    async fn unlink(&self, path: &str) -> Result<(), VfsError>;

    /// Dispatches to `rmdir` or `unlink` based on `stat`; `force`
    /// swallows ENOENT (spec §4.1 `rm`, §7 local recovery).
    async fn rm(&self, path: &str, recursive: bool, force: bool) -> Result<(), VfsError> {
        match self.stat(path).await {
            Ok(stat) if stat.is_directory => self.rmdir(path, recursive).await,
            Ok(_) => self.unlink(path).await,
            Err(e) if e.is_enoent() && force => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn copy_file(&self, src: &str, dest: &str) -> Result<(), VfsError>;
}
