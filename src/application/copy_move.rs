/**
 * Copy/Move planner (spec §4.2): turns a `COPY`/`MOVE` request into a
 * sequence of VFS calls, producing either a single top-level failure
 * or a success with a (possibly empty) list of per-resource errors
 * that become a 207 Multi-Status body.
 */
use crate::common::errors::{AppError, ErrorCode, VfsError};
use crate::domain::path::normalize;
use crate::domain::vfs::{ReaddirOptions, Vfs};
use axum::http::StatusCode;
use std::future::Future;
use std::pin::Pin;

/// One failed child resource inside a partially-successful recursive
/// copy (spec §4.2 "Outputs", §6 "Copy/Move partial failures").
#[derive(Debug, Clone)]
pub struct ResourceError {
    pub href: String,
    pub status: StatusCode,
    pub description: String,
}

#[derive(Debug, Clone, Copy)]
pub enum Depth {
    Zero,
    Infinity,
}

pub struct PlanOutcome {
    /// True when the destination did not previously exist (201 vs 204).
    pub created: bool,
    pub errors: Vec<ResourceError>,
}

fn status_for_vfs(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Enoent => StatusCode::NOT_FOUND,
        ErrorCode::Eexist => StatusCode::PRECONDITION_FAILED,
        ErrorCode::Enotdir | ErrorCode::Eisdir | ErrorCode::Enotempty => StatusCode::CONFLICT,
        ErrorCode::Einval => StatusCode::BAD_REQUEST,
        ErrorCode::Eacces | ErrorCode::Eperm => StatusCode::FORBIDDEN,
        ErrorCode::Enospc | ErrorCode::Efbig => StatusCode::INSUFFICIENT_STORAGE,
        ErrorCode::Other => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Checks the preconditions shared by copy and move (spec §4.2), returning
/// whether the destination already existed.
async fn check_preconditions(
    vfs: &dyn Vfs,
    src: &str,
    dest: &str,
    overwrite: bool,
) -> Result<bool, AppError> {
    let src_k = normalize(src);
    let dest_k = normalize(dest);

    let src_stat = vfs
        .stat(&src_k)
        .await
        .map_err(|_| AppError::status(StatusCode::NOT_FOUND, format!("source does not exist: {src_k}")))?;

    if src_k == dest_k {
        return Err(AppError::status(StatusCode::FORBIDDEN, "source and destination are the same resource"));
    }

    if src_stat.is_directory {
        let prefix = format!("{}/", src_k.trim_end_matches('/'));
        let src_prefix = if src_k == "/" { "/".to_string() } else { prefix };
        if dest_k.starts_with(&src_prefix) {
            return Err(AppError::status(StatusCode::FORBIDDEN, "destination is contained within source"));
        }
    }

    if dest_k == "/" {
        return Err(AppError::status(StatusCode::FORBIDDEN, "cannot overwrite the root"));
    }

    let dest_parent = parent_of(&dest_k);
    if dest_parent != "/" {
        match vfs.stat(&dest_parent).await {
            Ok(s) if s.is_directory => {}
            _ => return Err(AppError::status(StatusCode::CONFLICT, format!("destination parent does not exist: {dest_parent}"))),
        }
    }

    let dest_exists = vfs.stat(&dest_k).await.is_ok();
    if dest_exists {
        if !overwrite {
            return Err(AppError::status(StatusCode::PRECONDITION_FAILED, "destination exists and Overwrite is F"));
        }
        vfs.rm(&dest_k, true, true)
            .await
            .map_err(|e| AppError::status(status_for_vfs(e.code), e.message))?;
    }

    Ok(dest_exists)
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

fn copy_directory<'a>(
    vfs: &'a dyn Vfs,
    src: &'a str,
    dest: &'a str,
    depth: Depth,
    errors: &'a mut Vec<ResourceError>,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        if let Err(e) = vfs.mkdir(dest, false).await {
            if e.code != ErrorCode::Eexist {
                errors.push(ResourceError {
                    href: format!("{dest}/"),
                    status: status_for_vfs(e.code),
                    description: e.message,
                });
                return;
            }
        }

        if matches!(depth, Depth::Zero) {
            return;
        }

        let children = match vfs.readdir(src, ReaddirOptions::default()).await {
            Ok(c) => c,
            Err(e) => {
                errors.push(ResourceError {
                    href: format!("{src}/"),
                    status: status_for_vfs(e.code),
                    description: e.message,
                });
                return;
            }
        };

        for child in children {
            let child_src = child.path();
            let child_name = &child.name;
            let child_dest = join(dest, child_name);

            if child.is_directory {
                copy_directory(vfs, &child_src, &child_dest, depth, errors).await;
            } else if let Err(e) = vfs.copy_file(&child_src, &child_dest).await {
                errors.push(ResourceError {
                    href: child_dest,
                    status: status_for_vfs(e.code),
                    description: e.message,
                });
            }
        }
    })
}

fn join(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Executes a COPY. `depth` is `Zero` only for a directory source with
/// an explicit `Depth: 0` header; a file source ignores depth.
pub async fn copy(vfs: &dyn Vfs, src: &str, dest: &str, depth: Depth, overwrite: bool) -> Result<PlanOutcome, AppError> {
    let dest_existed = check_preconditions(vfs, src, dest, overwrite).await?;
    let src_k = normalize(src);
    let dest_k = normalize(dest);

    let src_stat = vfs.stat(&src_k).await.map_err(vfs_err_to_app)?;

    let mut errors = Vec::new();
    if src_stat.is_directory {
        copy_directory(vfs, &src_k, &dest_k, depth, &mut errors).await;
    } else if let Err(e) = vfs.copy_file(&src_k, &dest_k).await {
        return Err(AppError::status(status_for_vfs(e.code), e.message));
    }

    Ok(PlanOutcome {
        created: !dest_existed,
        errors,
    })
}

/// Executes a MOVE: `copy` followed by a recursive, forced removal of
/// the source. A directory source with `Depth: 0` is rejected (spec §4.2).
pub async fn mv(vfs: &dyn Vfs, src: &str, dest: &str, depth: Depth, overwrite: bool) -> Result<PlanOutcome, AppError> {
    let src_k = normalize(src);
    if src_k == "/" {
        return Err(AppError::status(StatusCode::FORBIDDEN, "cannot move the root"));
    }

    let src_stat = vfs.stat(&src_k).await.map_err(vfs_err_to_app)?;
    if src_stat.is_directory && matches!(depth, Depth::Zero) {
        return Err(AppError::status(StatusCode::BAD_REQUEST, "MOVE on a directory requires Depth: infinity"));
    }

    let outcome = copy(vfs, src, dest, depth, overwrite).await?;
    if outcome.errors.is_empty() {
        vfs.rm(&src_k, true, true).await.map_err(vfs_err_to_app)?;
    }
    Ok(outcome)
}

fn vfs_err_to_app(e: VfsError) -> AppError {
    AppError::status(status_for_vfs(e.code), e.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::memory_vfs::MemVfs;
    use bytes::Bytes;

    #[tokio::test]
    async fn copy_directory_recursively() {
        let vfs = MemVfs::new();
        vfs.write_file("/x/y.txt", Bytes::from_static(b"Y")).await.unwrap();
        let outcome = copy(&vfs, "/x", "/z", Depth::Infinity, false).await.unwrap();
        assert!(outcome.errors.is_empty());
        assert!(outcome.created);
        let content = vfs.read_file("/z/y.txt").await.unwrap();
        assert_eq!(content, Bytes::from_static(b"Y"));
    }

    #[tokio::test]
    async fn copy_overwrite_false_conflicts_with_existing_destination() {
        let vfs = MemVfs::new();
        vfs.write_file("/x/y.txt", Bytes::from_static(b"Y")).await.unwrap();
        copy(&vfs, "/x", "/z", Depth::Infinity, false).await.unwrap();
        let err = copy(&vfs, "/x", "/z", Depth::Infinity, false).await.unwrap_err();
        match err {
            AppError::Status(status, _) => assert_eq!(status, StatusCode::PRECONDITION_FAILED),
            _ => panic!("expected Status variant"),
        }
    }

    #[tokio::test]
    async fn move_self_containment_is_forbidden() {
        let vfs = MemVfs::new();
        vfs.mkdir("/a", true).await.unwrap();
        let err = mv(&vfs, "/a", "/a/sub", Depth::Infinity, false).await.unwrap_err();
        match err {
            AppError::Status(status, _) => assert_eq!(status, StatusCode::FORBIDDEN),
            _ => panic!("expected Status variant"),
        }
    }

    #[tokio::test]
    async fn move_file_relocates_and_removes_source() {
        let vfs = MemVfs::new();
        vfs.write_file("/hello.txt", Bytes::from_static(b"hi")).await.unwrap();
        mv(&vfs, "/hello.txt", "/moved.txt", Depth::Infinity, false).await.unwrap();
        assert!(vfs.stat("/hello.txt").await.is_err());
        assert_eq!(vfs.read_file("/moved.txt").await.unwrap(), Bytes::from_static(b"hi"));
    }
}
