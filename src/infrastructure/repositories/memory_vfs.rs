/**
 * In-memory virtual filesystem (spec §4.9 "Test tooling"). Implements
 * the same `Vfs` contract as `PgVfs` over a `BTreeMap` instead of a
 * table, so the protocol layer and the copy/move planner can be
 * exercised without a database.
 *
 * The key space mirrors the SQL design exactly: a row keyed by a
 * normalized path with no trailing slash is a file, one with a
 * trailing slash is an explicit directory. Prefix queries become
 * `BTreeMap::range` scans, the in-memory analogue of `LIKE 'prefix%'`.
 */
use crate::common::errors::VfsError;
use crate::domain::hash::etag_for;
use crate::domain::path::{as_dir_key, normalize};
use crate::domain::vfs::{DirEntry, ReaddirOptions, ReadStream, Stat, Vfs};
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Row {
    created_at: i64,
    modified_at: i64,
    size: u64,
    etag: String,
    /// `None` means this is an explicit directory row.
    content: Option<Bytes>,
}

pub struct MemVfs {
    rows: Mutex<BTreeMap<String, Row>>,
    clock: AtomicI64,
}

impl Default for MemVfs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemVfs {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            clock: AtomicI64::new(1),
        }
    }

    /// A strictly increasing logical clock, standing in for
    /// `chrono::Utc::now()` so tests get deterministic ordering.
    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Every key under `prefix`, in lexical order, `prefix` itself excluded.
    fn descendants<'a>(rows: &'a BTreeMap<String, Row>, prefix: &str) -> impl Iterator<Item = (&'a String, &'a Row)> {
        rows.range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .filter(move |(k, _)| k.as_str() != prefix)
    }

    async fn resolve_directory(&self, dir_key: &str) -> Result<Stat, VfsError> {
        let rows = self.rows.lock().await;
        if let Some(row) = rows.get(dir_key) {
            if row.content.is_none() {
                return Ok(Stat {
                    is_file: false,
                    is_directory: true,
                    size: 0,
                    mtime_ms: row.modified_at,
                    ctime_ms: row.created_at,
                    etag: None,
                });
            }
        }
        let mut min_created = i64::MAX;
        let mut max_modified = i64::MIN;
        let mut count = 0usize;
        for (_, row) in Self::descendants(&rows, dir_key) {
            count += 1;
            min_created = min_created.min(row.created_at);
            max_modified = max_modified.max(row.modified_at);
        }
        if count == 0 {
            return Err(VfsError::enoent("stat", dir_key));
        }
        Ok(Stat {
            is_file: false,
            is_directory: true,
            size: 0,
            mtime_ms: max_modified,
            ctime_ms: min_created,
            etag: None,
        })
    }
}

#[async_trait]
impl Vfs for MemVfs {
    async fn stat(&self, path: &str) -> Result<Stat, VfsError> {
        let k = normalize(path);
        if k != "/" {
            let rows = self.rows.lock().await;
            if let Some(row) = rows.get(&k) {
                if let Some(content) = &row.content {
                    return Ok(Stat {
                        is_file: true,
                        is_directory: false,
                        size: content.len() as u64,
                        mtime_ms: row.modified_at,
                        ctime_ms: row.created_at,
                        etag: Some(row.etag.clone()),
                    });
                }
            }
        }
        self.resolve_directory(&as_dir_key(&k)).await
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<Option<String>, VfsError> {
        let k = normalize(path);
        if self.stat(&k).await.is_ok() {
            return Err(VfsError::eexist("mkdir", &k));
        }

        if !recursive {
            let parent = parent_of(&k);
            if parent != "/" {
                match self.stat(&parent).await {
                    Ok(s) if s.is_directory => {}
                    Ok(_) => return Err(VfsError::enotdir("mkdir", &parent)),
                    Err(_) => return Err(VfsError::enoent("mkdir", &parent)),
                }
            }
        }

        let dir_key = as_dir_key(&k);
        let now = self.tick();
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&dir_key) {
            return Err(VfsError::eexist("mkdir", &k));
        }
        rows.insert(
            dir_key,
            Row {
                created_at: now,
                modified_at: now,
                size: 0,
                etag: String::new(),
                content: None,
            },
        );
        Ok(if recursive { Some(k) } else { None })
    }

    async fn write_file(&self, path: &str, content: Bytes) -> Result<(), VfsError> {
        let k = normalize(path);
        if k == "/" {
            return Err(VfsError::eisdir("writeFile", &k));
        }
        let dir_key = as_dir_key(&k);
        let now = self.tick();
        let etag = etag_for(&content);
        let size = content.len() as u64;

        let mut rows = self.rows.lock().await;
        if rows.contains_key(&dir_key) {
            return Err(VfsError::eisdir("writeFile", &k));
        }
        let created_at = rows.get(&k).map(|r| r.created_at).unwrap_or(now);
        rows.insert(
            k,
            Row {
                created_at,
                modified_at: now,
                size,
                etag,
                content: Some(content),
            },
        );
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Bytes, VfsError> {
        let k = normalize(path);
        let rows = self.rows.lock().await;
        rows.get(&k)
            .and_then(|r| r.content.clone())
            .ok_or_else(|| VfsError::enoent("readFile", &k))
    }

    async fn create_read_stream(&self, path: &str, chunk_size: usize) -> Result<ReadStream, VfsError> {
        let content = self.read_file(path).await?;
        let chunk_size = chunk_size.max(1);
        let stream = stream! {
            let mut offset = 0usize;
            while offset < content.len() {
                let end = (offset + chunk_size).min(content.len());
                yield Ok(content.slice(offset..end));
                offset = end;
            }
        };
        Ok(Box::pin(stream))
    }

    async fn readdir(&self, path: &str, opts: ReaddirOptions) -> Result<Vec<DirEntry>, VfsError> {
        let k = normalize(path);
        match self.stat(&k).await {
            Ok(s) if s.is_directory => {}
            Ok(_) => return Err(VfsError::enotdir("readdir", &k)),
            Err(e) => return Err(e),
        }

        let dir_key = as_dir_key(&k);
        let rows = self.rows.lock().await;
        let raw: Vec<(String, bool)> = Self::descendants(&rows, &dir_key)
            .map(|(path, row)| (path.clone(), row.content.is_none()))
            .collect();
        drop(rows);

        let mut entries = build_entries(&k, &dir_key, &raw);
        if !opts.recursive {
            entries.retain(|e| e.parent == k);
        }
        entries.sort_by(|a, b| {
            a.parent
                .cmp(&b.parent)
                .then(b.is_directory.cmp(&a.is_directory))
                .then(a.name.cmp(&b.name))
        });
        Ok(entries)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), VfsError> {
        let old_k = normalize(old_path);
        let new_k = normalize(new_path);
        let old_stat = self.stat(&old_k).await?;
        let now = self.tick();

        if !old_stat.is_directory {
            match self.stat(&new_k).await {
                Ok(s) if s.is_file => return Err(VfsError::eexist("rename", &new_k)),
                Ok(_) => return Err(VfsError::eisdir("rename", &new_k)),
                Err(_) => {}
            }
            let mut rows = self.rows.lock().await;
            if let Some(mut row) = rows.remove(&old_k) {
                row.modified_at = now;
                rows.insert(new_k, row);
            }
            return Ok(());
        }

        if let Ok(s) = self.stat(&new_k).await {
            if s.is_file {
                return Err(VfsError::eexist("rename", &new_k));
            }
        }

        let old_dir_key = as_dir_key(&old_k);
        let new_dir_key = as_dir_key(&new_k);

        let mut rows = self.rows.lock().await;
        if rows.contains_key(&new_dir_key) {
            return Err(VfsError::eexist("rename", &new_k));
        }

        let to_move: Vec<String> = Self::descendants(&rows, &old_dir_key).map(|(k, _)| k.clone()).collect();
        let had_explicit = rows.contains_key(&old_dir_key);

        if had_explicit {
            if let Some(mut row) = rows.remove(&old_dir_key) {
                row.modified_at = now;
                rows.insert(new_dir_key.clone(), row);
            }
        }
        for old_full in to_move {
            if let Some(mut row) = rows.remove(&old_full) {
                row.modified_at = now;
                let new_full = format!("{new_dir_key}{}", &old_full[old_dir_key.len()..]);
                rows.insert(new_full, row);
            }
        }
        Ok(())
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), VfsError> {
        let k = normalize(path);
        match self.stat(&k).await {
            Ok(s) if s.is_file => return Err(VfsError::enotdir("rmdir", &k)),
            Ok(_) => {}
            Err(e) => return Err(e),
        }

        let dir_key = as_dir_key(&k);
        let mut rows = self.rows.lock().await;

        if !recursive {
            let has_children = Self::descendants(&rows, &dir_key).next().is_some();
            if has_children {
                return Err(VfsError::enotempty("rmdir", &k));
            }
            rows.remove(&dir_key);
            return Ok(());
        }

        let to_remove: Vec<String> = Self::descendants(&rows, &dir_key).map(|(k, _)| k.clone()).collect();
        for key in to_remove {
            rows.remove(&key);
        }
        rows.remove(&dir_key);
        Ok(())
    }

    async fn unlink(&self, path: &str) -> Result<(), VfsError> {
        if path.ends_with('/') {
            return Err(VfsError::eisdir("unlink", path));
        }
        let k = normalize(path);
        let mut rows = self.rows.lock().await;
        match rows.get(&k) {
            Some(row) if row.content.is_some() => {
                rows.remove(&k);
                Ok(())
            }
            _ => Err(VfsError::enoent("unlink", &k)),
        }
    }

    async fn copy_file(&self, src: &str, dest: &str) -> Result<(), VfsError> {
        if src.ends_with('/') {
            return Err(VfsError::einval("copyFile", src, "source is a directory key"));
        }
        let src_k = normalize(src);
        let dest_k = normalize(dest);

        if let Ok(s) = self.stat(&dest_k).await {
            if s.is_directory {
                return Err(VfsError::eisdir("copyFile", &dest_k));
            }
        }

        let now = self.tick();
        let mut rows = self.rows.lock().await;
        let source = rows
            .get(&src_k)
            .filter(|r| r.content.is_some())
            .cloned()
            .ok_or_else(|| VfsError::enoent("copyFile", &src_k))?;

        rows.insert(
            dest_k,
            Row {
                created_at: now,
                modified_at: now,
                size: source.size,
                etag: source.etag,
                content: source.content,
            },
        );
        Ok(())
    }
}

fn parent_of(normalized: &str) -> String {
    if normalized == "/" {
        return "/".to_string();
    }
    match normalized.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
        None => "/".to_string(),
    }
}

fn join_dir(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Identical in shape to `pg_vfs::build_entries`; duplicated rather
/// than shared since the two backends otherwise have no common module
/// and this is the one piece of non-trivial logic between them.
fn build_entries(root: &str, dir_key: &str, rows: &[(String, bool)]) -> Vec<DirEntry> {
    let mut dirs: HashMap<String, DirEntry> = HashMap::new();
    let mut files: Vec<DirEntry> = Vec::new();

    for (full_path, is_dir) in rows {
        let rel = &full_path[dir_key.len()..];
        let rel_trimmed = rel.trim_end_matches('/');
        if rel_trimmed.is_empty() {
            continue;
        }
        let segments: Vec<&str> = rel_trimmed.split('/').collect();

        let ancestor_count = if *is_dir { segments.len() } else { segments.len() - 1 };
        let mut parent = root.to_string();
        for seg in segments.iter().take(ancestor_count) {
            let full = join_dir(&parent, seg);
            let key = format!("{full}/");
            dirs.entry(key).or_insert_with(|| DirEntry {
                name: seg.to_string(),
                parent: parent.clone(),
                is_file: false,
                is_directory: true,
            });
            parent = full;
        }

        if !is_dir {
            let name = segments[segments.len() - 1];
            files.push(DirEntry {
                name: name.to_string(),
                parent,
                is_file: true,
                is_directory: false,
            });
        }
    }

    let mut all: Vec<DirEntry> = dirs.into_values().collect();
    all.extend(files);
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let vfs = MemVfs::new();
        vfs.write_file("/a/b.txt", Bytes::from_static(b"hello")).await.unwrap();
        let content = vfs.read_file("/a/b.txt").await.unwrap();
        assert_eq!(content, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn write_file_creates_implicit_ancestors() {
        let vfs = MemVfs::new();
        vfs.write_file("/a/b/c.txt", Bytes::from_static(b"x")).await.unwrap();
        let stat = vfs.stat("/a/b").await.unwrap();
        assert!(stat.is_directory);
        let stat = vfs.stat("/a").await.unwrap();
        assert!(stat.is_directory);
    }

    #[tokio::test]
    async fn mkdir_then_file_same_base_conflicts() {
        let vfs = MemVfs::new();
        vfs.mkdir("/docs", true).await.unwrap();
        let err = vfs.write_file("/docs", Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err.code, crate::common::errors::ErrorCode::Eisdir));
    }

    #[tokio::test]
    async fn readdir_non_recursive_lists_immediate_children_only() {
        let vfs = MemVfs::new();
        vfs.write_file("/a/b/c.txt", Bytes::from_static(b"x")).await.unwrap();
        vfs.write_file("/a/d.txt", Bytes::from_static(b"y")).await.unwrap();
        let entries = vfs.readdir("/a", ReaddirOptions::default()).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "d.txt"]);
    }

    #[tokio::test]
    async fn rename_directory_moves_descendants() {
        let vfs = MemVfs::new();
        vfs.write_file("/a/b/c.txt", Bytes::from_static(b"x")).await.unwrap();
        vfs.rename("/a", "/z").await.unwrap();
        assert!(vfs.stat("/a").await.is_err());
        assert!(vfs.stat("/z/b/c.txt").await.is_ok());
    }

    #[tokio::test]
    async fn rmdir_non_recursive_fails_when_not_empty() {
        let vfs = MemVfs::new();
        vfs.write_file("/a/b.txt", Bytes::from_static(b"x")).await.unwrap();
        let err = vfs.rmdir("/a", false).await.unwrap_err();
        assert!(matches!(err.code, crate::common::errors::ErrorCode::Enotempty));
    }

    // The remaining tests map directly onto the invariants (spec §8).

    #[tokio::test]
    async fn invariant_write_then_stat_matches_content_and_etag() {
        let vfs = MemVfs::new();
        let body = Bytes::from_static(b"hi");
        vfs.write_file("/hello.txt", body.clone()).await.unwrap();
        let stat = vfs.stat("/hello.txt").await.unwrap();
        assert_eq!(stat.size, body.len() as u64);
        assert_eq!(stat.etag.as_deref(), Some(crate::domain::hash::etag_for(&body).as_str()));
        assert_eq!(vfs.read_file("/hello.txt").await.unwrap(), body);
    }

    #[tokio::test]
    async fn invariant_file_and_directory_stat_are_mutually_exclusive() {
        let vfs = MemVfs::new();
        vfs.write_file("/a.txt", Bytes::from_static(b"x")).await.unwrap();
        vfs.mkdir("/d", true).await.unwrap();
        let file_stat = vfs.stat("/a.txt").await.unwrap();
        let dir_stat = vfs.stat("/d").await.unwrap();
        assert!(file_stat.is_file && !file_stat.is_directory);
        assert!(dir_stat.is_directory && !dir_stat.is_file);
    }

    #[tokio::test]
    async fn invariant_mkdir_never_creates_the_same_directory_twice() {
        let vfs = MemVfs::new();
        vfs.mkdir("/d", true).await.unwrap();
        let err = vfs.mkdir("/d", true).await.unwrap_err();
        assert!(matches!(err.code, crate::common::errors::ErrorCode::Eexist));
    }

    #[tokio::test]
    async fn invariant_rename_file_removes_source_and_preserves_content() {
        let vfs = MemVfs::new();
        let body = Bytes::from_static(b"hi");
        vfs.write_file("/a.txt", body.clone()).await.unwrap();
        vfs.rename("/a.txt", "/b.txt").await.unwrap();
        assert!(vfs.stat("/a.txt").await.is_err());
        assert_eq!(vfs.read_file("/b.txt").await.unwrap(), body);
    }

    #[tokio::test]
    async fn invariant_recursive_rm_leaves_no_descendant_rows() {
        let vfs = MemVfs::new();
        vfs.write_file("/d/a.txt", Bytes::from_static(b"x")).await.unwrap();
        vfs.write_file("/d/sub/b.txt", Bytes::from_static(b"y")).await.unwrap();
        vfs.rm("/d", true, false).await.unwrap();
        assert!(vfs.stat("/d").await.is_err());
        assert!(vfs.stat("/d/a.txt").await.is_err());
        assert!(vfs.stat("/d/sub/b.txt").await.is_err());
    }

    #[tokio::test]
    async fn invariant_like_metacharacters_in_names_do_not_leak_across_siblings() {
        let vfs = MemVfs::new();
        vfs.write_file("/a%b", Bytes::from_static(b"1")).await.unwrap();
        vfs.write_file("/a_b", Bytes::from_static(b"2")).await.unwrap();
        vfs.write_file("/axb", Bytes::from_static(b"3")).await.unwrap();

        let entries = vfs.readdir("/", ReaddirOptions::default()).await.unwrap();
        let names: std::collections::HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains("a%b") && names.contains("a_b") && names.contains("axb"));

        vfs.unlink("/a%b").await.unwrap();
        vfs.unlink("/a_b").await.unwrap();
        assert_eq!(vfs.read_file("/axb").await.unwrap(), Bytes::from_static(b"3"));
    }
}
