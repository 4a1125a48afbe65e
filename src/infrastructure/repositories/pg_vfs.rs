/**
 * Postgres-backed virtual filesystem (components C + D, the core of
 * spec §4.1). A single table holds both files and directories; the
 * hierarchy is derived from path prefixes (spec §3 "Implicit vs
 * explicit directories").
 *
 * Every method normalizes its path arguments first (component A) and
 * maps `sqlx::Error` to `VfsError` at the query boundary, following
 * the teacher's `DomainError::database_error(...)` convention.
 */
use crate::common::errors::VfsError;
use crate::domain::hash::etag_for;
use crate::domain::path::{as_dir_key, like_prefix_pattern, normalize, LIKE_ESCAPE};
use crate::domain::vfs::{DirEntry, ReaddirOptions, ReadStream, Stat, Vfs};
use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

pub struct PgVfs {
    pool: PgPool,
    table: String,
}

impl PgVfs {
    pub fn new(pool: PgPool, table_name: impl Into<String>) -> Self {
        Self {
            pool,
            table: table_name.into(),
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn explicit_dir_stat(&self, dir_key: &str) -> Result<Option<Stat>, VfsError> {
        let sql = format!(
            "SELECT created_at, modified_at FROM {} WHERE path = $1",
            self.table
        );
        let row = sqlx::query(&sql).bind(dir_key).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| Stat {
            is_file: false,
            is_directory: true,
            size: 0,
            mtime_ms: r.get::<i64, _>("modified_at"),
            ctime_ms: r.get::<i64, _>("created_at"),
            etag: None,
        }))
    }

    async fn implicit_dir_stat(&self, dir_key: &str) -> Result<Option<Stat>, VfsError> {
        let pattern = like_prefix_pattern(dir_key);
        let sql = format!(
            "SELECT MIN(created_at) AS min_created, MAX(modified_at) AS max_modified, COUNT(*) AS n \
             FROM {} WHERE path LIKE $1 ESCAPE $2 AND path <> $3",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(&pattern)
            .bind(LIKE_ESCAPE)
            .bind(dir_key)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Stat {
            is_file: false,
            is_directory: true,
            size: 0,
            mtime_ms: row.get::<Option<i64>, _>("max_modified").unwrap_or(0),
            ctime_ms: row.get::<Option<i64>, _>("min_created").unwrap_or(0),
            etag: None,
        }))
    }

    /// Resolves a directory (explicit row, else implicit), the shared
    /// second half of `stat`'s two entry points (spec §4.1 step 1).
    async fn resolve_directory(&self, dir_key: &str) -> Result<Stat, VfsError> {
        if let Some(s) = self.explicit_dir_stat(dir_key).await? {
            return Ok(s);
        }
        if let Some(s) = self.implicit_dir_stat(dir_key).await? {
            return Ok(s);
        }
        Err(VfsError::enoent("stat", dir_key))
    }

    async fn file_stat(&self, key: &str) -> Result<Option<Stat>, VfsError> {
        let sql = format!(
            "SELECT created_at, modified_at, size, etag FROM {} WHERE path = $1 AND content IS NOT NULL",
            self.table
        );
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| Stat {
            is_file: true,
            is_directory: false,
            size: r.get::<i64, _>("size") as u64,
            mtime_ms: r.get::<i64, _>("modified_at"),
            ctime_ms: r.get::<i64, _>("created_at"),
            etag: Some(r.get::<String, _>("etag")),
        }))
    }
}

#[async_trait]
impl Vfs for PgVfs {
    async fn stat(&self, path: &str) -> Result<Stat, VfsError> {
        let k = normalize(path);
        if k == "/" {
            return self.resolve_directory("/").await;
        }
        if let Some(s) = self.file_stat(&k).await? {
            return Ok(s);
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
        let now = Self::now_ms();
        let sql = format!(
            "INSERT INTO {} (path, created_at, modified_at, size, etag, content) \
             VALUES ($1, $2, $2, 0, '', NULL) ON CONFLICT (path) DO NOTHING",
            self.table
        );
        let result = sqlx::query(&sql).bind(&dir_key).bind(now).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(VfsError::eexist("mkdir", &k));
        }

        Ok(if recursive { Some(k) } else { None })
    }

    async fn write_file(&self, path: &str, content: Bytes) -> Result<(), VfsError> {
        let k = normalize(path);
        if k == "/" {
            return Err(VfsError::eisdir("writeFile", &k));
        }
        if self.explicit_dir_stat(&as_dir_key(&k)).await?.is_some() {
            return Err(VfsError::eisdir("writeFile", &k));
        }

        let now = Self::now_ms();
        let etag = etag_for(&content);
        let size = content.len() as i64;
        let sql = format!(
            "INSERT INTO {table} (path, created_at, modified_at, size, etag, content) \
             VALUES ($1, $2, $2, $3, $4, $5) \
             ON CONFLICT (path) DO UPDATE SET \
               content = EXCLUDED.content, size = EXCLUDED.size, \
               modified_at = EXCLUDED.modified_at, etag = EXCLUDED.etag",
            table = self.table
        );
        sqlx::query(&sql)
            .bind(&k)
            .bind(now)
            .bind(size)
            .bind(&etag)
            .bind(content.as_ref())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Bytes, VfsError> {
        let k = normalize(path);
        let sql = format!("SELECT content FROM {} WHERE path = $1", self.table);
        let row = sqlx::query(&sql).bind(&k).fetch_optional(&self.pool).await?;
        match row {
            Some(r) => match r.get::<Option<Vec<u8>>, _>("content") {
                Some(bytes) => Ok(Bytes::from(bytes)),
                None => Err(VfsError::enoent("readFile", &k)),
            },
            None => Err(VfsError::enoent("readFile", &k)),
        }
    }

    async fn create_read_stream(&self, path: &str, chunk_size: usize) -> Result<ReadStream, VfsError> {
        let k = normalize(path);
        // Confirm the file exists up front so callers see ENOENT
        // immediately rather than on the first chunk.
        if self.file_stat(&k).await?.is_none() {
            return Err(VfsError::enoent("createReadStream", &k));
        }

        let pool = self.pool.clone();
        let table = self.table.clone();
        let chunk_size = chunk_size.max(1) as i64;

        let stream = try_stream! {
            let mut offset: i64 = 1; // substr is 1-indexed (spec §4.1)
            loop {
                let sql = format!(
                    "SELECT substr(content, $1, $2) AS chunk FROM {table} WHERE path = $3"
                );
                let row = sqlx::query(&sql)
                    .bind(offset)
                    .bind(chunk_size)
                    .bind(&k)
                    .fetch_optional(&pool)
                    .await
                    .map_err(VfsError::from)?;
                let Some(row) = row else {
                    break;
                };
                let chunk: Vec<u8> = row.get("chunk");
                if chunk.is_empty() {
                    break;
                }
                offset += chunk.len() as i64;
                yield Bytes::from(chunk);
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
        let pattern = like_prefix_pattern(&dir_key);
        let sql = format!(
            "SELECT path, content IS NULL AS is_dir FROM {} WHERE path LIKE $1 ESCAPE $2",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(LIKE_ESCAPE)
            .fetch_all(&self.pool)
            .await?;

        let raw: Vec<(String, bool)> = rows
            .into_iter()
            .map(|r| (r.get::<String, _>("path"), r.get::<bool, _>("is_dir")))
            .collect();

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

        if !old_stat.is_directory {
            match self.stat(&new_k).await {
                Ok(s) if s.is_file => return Err(VfsError::eexist("rename", &new_k)),
                Ok(_) => return Err(VfsError::eisdir("rename", &new_k)),
                Err(_) => {}
            }
            let now = Self::now_ms();
            let sql = format!(
                "UPDATE {} SET path = $1, modified_at = $2 WHERE path = $3",
                self.table
            );
            sqlx::query(&sql).bind(&new_k).bind(now).bind(&old_k).execute(&self.pool).await?;
            return Ok(());
        }

        if let Ok(s) = self.stat(&new_k).await {
            if s.is_file {
                return Err(VfsError::eexist("rename", &new_k));
            }
        }

        let old_dir_key = as_dir_key(&old_k);
        let new_dir_key = as_dir_key(&new_k);

        if self.explicit_dir_stat(&new_dir_key).await?.is_some() {
            return Err(VfsError::eexist("rename", &new_k));
        }

        let now = Self::now_ms();
        if self.explicit_dir_stat(&old_dir_key).await?.is_some() {
            let sql = format!(
                "UPDATE {} SET path = $1, modified_at = $2 WHERE path = $3",
                self.table
            );
            sqlx::query(&sql)
                .bind(&new_dir_key)
                .bind(now)
                .bind(&old_dir_key)
                .execute(&self.pool)
                .await?;
        }

        let pattern = like_prefix_pattern(&old_dir_key);
        let sql = format!(
            "UPDATE {} SET path = $1 || substr(path, $2), modified_at = $3 \
             WHERE path LIKE $4 ESCAPE $5",
            self.table
        );
        sqlx::query(&sql)
            .bind(&new_dir_key)
            .bind(old_dir_key.len() as i64 + 1)
            .bind(now)
            .bind(&pattern)
            .bind(LIKE_ESCAPE)
            .execute(&self.pool)
            .await?;

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
        let pattern = like_prefix_pattern(&dir_key);

        if !recursive {
            let count_sql = format!(
                "SELECT COUNT(*) AS n FROM {} WHERE path LIKE $1 ESCAPE $2 AND path <> $3",
                self.table
            );
            let row = sqlx::query(&count_sql)
                .bind(&pattern)
                .bind(LIKE_ESCAPE)
                .bind(&dir_key)
                .fetch_one(&self.pool)
                .await?;
            let n: i64 = row.get("n");
            if n > 0 {
                return Err(VfsError::enotempty("rmdir", &k));
            }
            let sql = format!("DELETE FROM {} WHERE path = $1", self.table);
            sqlx::query(&sql).bind(&dir_key).execute(&self.pool).await?;
            return Ok(());
        }

        let sql = format!(
            "DELETE FROM {} WHERE path = $1 OR path LIKE $2 ESCAPE $3",
            self.table
        );
        sqlx::query(&sql)
            .bind(&dir_key)
            .bind(&pattern)
            .bind(LIKE_ESCAPE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unlink(&self, path: &str) -> Result<(), VfsError> {
        if path.ends_with('/') {
            return Err(VfsError::eisdir("unlink", path));
        }
        let k = normalize(path);
        if self.file_stat(&k).await?.is_none() {
            return Err(VfsError::enoent("unlink", &k));
        }
        let sql = format!("DELETE FROM {} WHERE path = $1", self.table);
        sqlx::query(&sql).bind(&k).execute(&self.pool).await?;
        Ok(())
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

        let sql = format!(
            "SELECT size, etag, content FROM {} WHERE path = $1 AND content IS NOT NULL",
            self.table
        );
        let row = sqlx::query(&sql).bind(&src_k).fetch_optional(&self.pool).await?;
        let Some(row) = row else {
            return Err(VfsError::enoent("copyFile", &src_k));
        };
        let size: i64 = row.get("size");
        let etag: String = row.get("etag");
        let content: Vec<u8> = row.get("content");

        let now = Self::now_ms();
        let sql = format!(
            "INSERT INTO {table} (path, created_at, modified_at, size, etag, content) \
             VALUES ($1, $2, $2, $3, $4, $5) \
             ON CONFLICT (path) DO UPDATE SET \
               content = EXCLUDED.content, size = EXCLUDED.size, \
               modified_at = EXCLUDED.modified_at, etag = EXCLUDED.etag, \
               created_at = EXCLUDED.created_at",
            table = self.table
        );
        sqlx::query(&sql)
            .bind(&dest_k)
            .bind(now)
            .bind(size)
            .bind(&etag)
            .bind(&content)
            .execute(&self.pool)
            .await?;
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

/// Turns a flat row set under `dir_key` into a fully-resolved entry
/// tree: every descendant file plus every ancestor directory segment,
/// explicit or implicit (spec §4.1 `readdir`). Non-recursive listing
/// is simply the subset whose `parent == root`.
fn build_entries(root: &str, dir_key: &str, rows: &[(String, bool)]) -> Vec<DirEntry> {
    let mut dirs: HashMap<String, DirEntry> = HashMap::new();
    let mut files: Vec<DirEntry> = Vec::new();

    for (full_path, is_dir) in rows {
        if full_path == dir_key {
            continue;
        }
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
