/**
 * Error handling.
 *
 * Mirrors the teacher's `DomainError` / service-error layering: a
 * low-level, engine-neutral error carries a POSIX-style code and enough
 * context to log usefully (`VfsError`, spec §4.1/§7), and a thin
 * HTTP-facing wrapper (`AppError`) maps it to a status code and body.
 */
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// The engine-neutral error taxonomy from spec §4.1 / §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Enoent,
    Eexist,
    Eisdir,
    Enotdir,
    Enotempty,
    Einval,
    Eperm,
    Eacces,
    Enospc,
    Efbig,
    Other,
}

/// A VFS-level error: `{code, syscall, path, message}` per spec §4.1.
#[derive(Debug, Error)]
#[error("{syscall} {path}: {message}")]
pub struct VfsError {
    pub code: ErrorCode,
    pub syscall: &'static str,
    pub path: String,
    pub message: String,
}

impl VfsError {
    pub fn new(code: ErrorCode, syscall: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            syscall,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn enoent(syscall: &'static str, path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(ErrorCode::Enoent, syscall, path.clone(), format!("no such file or directory: {path}"))
    }

    pub fn eexist(syscall: &'static str, path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(ErrorCode::Eexist, syscall, path.clone(), format!("already exists: {path}"))
    }

    pub fn eisdir(syscall: &'static str, path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(ErrorCode::Eisdir, syscall, path.clone(), format!("is a directory: {path}"))
    }

    pub fn enotdir(syscall: &'static str, path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(ErrorCode::Enotdir, syscall, path.clone(), format!("not a directory: {path}"))
    }

    pub fn enotempty(syscall: &'static str, path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(ErrorCode::Enotempty, syscall, path.clone(), format!("directory not empty: {path}"))
    }

    pub fn einval(syscall: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Einval, syscall, path, message)
    }

    pub fn other(syscall: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Other, syscall, path, message)
    }

    pub fn is_enoent(&self) -> bool {
        self.code == ErrorCode::Enoent
    }
}

impl From<sqlx::Error> for VfsError {
    fn from(err: sqlx::Error) -> Self {
        VfsError::new(ErrorCode::Other, "sql", "", err.to_string())
    }
}

/// HTTP-facing error. Carries the VFS error plus an explicit override
/// for the handful of WebDAV-specific statuses (412, 409, 403, 502)
/// that don't correspond to a filesystem error at all (spec §4.2/§4.3.2).
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error("{0}")]
    Status(StatusCode, String),
}

impl AppError {
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        AppError::Status(code, message.into())
    }
}

/// Maps a `VfsError` to an HTTP status per spec §7.
fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Enoent => StatusCode::NOT_FOUND,
        ErrorCode::Eexist => StatusCode::BAD_REQUEST,
        ErrorCode::Enotdir | ErrorCode::Eisdir | ErrorCode::Enotempty => StatusCode::CONFLICT,
        ErrorCode::Einval => StatusCode::BAD_REQUEST,
        ErrorCode::Eacces | ErrorCode::Eperm => StatusCode::FORBIDDEN,
        ErrorCode::Enospc | ErrorCode::Efbig => StatusCode::INSUFFICIENT_STORAGE,
        ErrorCode::Other => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Vfs(err) => {
                let status = status_for(err.code);
                if status.is_server_error() {
                    tracing::error!(syscall = err.syscall, path = %err.path, "{}", err.message);
                } else {
                    tracing::warn!(syscall = err.syscall, path = %err.path, "{}", err.message);
                }
                (status, err.message).into_response()
            }
            AppError::Status(status, message) => {
                if status.is_server_error() {
                    tracing::error!("{message}");
                }
                (status, message).into_response()
            }
        }
    }
}
