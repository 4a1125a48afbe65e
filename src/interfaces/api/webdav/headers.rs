/**
 * `Destination` / `Depth` / `Overwrite` header parsing for MOVE/COPY
 * (spec §4.3.2).
 */
use crate::application::copy_move::Depth;
use crate::common::errors::AppError;
use crate::domain::path::normalize;
use axum::http::{HeaderMap, StatusCode};
use url::Url;

pub fn parse_depth(headers: &HeaderMap) -> Depth {
    match headers.get("Depth").and_then(|v| v.to_str().ok()) {
        Some("0") => Depth::Zero,
        _ => Depth::Infinity,
    }
}

pub fn parse_overwrite(headers: &HeaderMap) -> bool {
    match headers.get("Overwrite").and_then(|v| v.to_str().ok()) {
        Some("F") => false,
        _ => true,
    }
}

/// The request's own origin, derived from the `Host` header rather than
/// `Request::uri()` — an HTTP/1.1 request line is origin-form, so the
/// scheme/authority `axum::serve` hands back are always absent (spec
/// §4.3.2). This server never terminates TLS itself, so the scheme is
/// always `http`.
pub fn request_origin(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|host| format!("http://{host}"))
        .unwrap_or_default()
}

/// Resolves the `Destination` header to a normalized path, rejecting
/// cross-origin destinations with 502 (spec §4.3.2).
pub fn parse_destination(headers: &HeaderMap, request_origin: &str) -> Result<String, AppError> {
    let raw = headers
        .get("Destination")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::status(StatusCode::BAD_REQUEST, "missing Destination header"))?;

    let url = Url::parse(raw).map_err(|_| AppError::status(StatusCode::BAD_REQUEST, "malformed Destination header"))?;
    let origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    let origin = match url.port() {
        Some(p) => format!("{origin}:{p}"),
        None => origin,
    };
    if !request_origin.is_empty() && origin != request_origin {
        return Err(AppError::status(StatusCode::BAD_GATEWAY, "Destination must share the request's origin"));
    }

    let decoded = percent_decode(url.path());
    Ok(normalize(&decoded))
}

pub fn percent_decode(raw: &str) -> String {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
