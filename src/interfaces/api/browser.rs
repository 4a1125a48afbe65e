/**
 * Browser index (spec §4.5): when the optional browser feature is
 * enabled, a `GET` from a browser user-agent resolves `/` and
 * directory paths to `index.html`, honors conditional-GET headers,
 * and — in `list` mode — falls back to an HTML directory listing.
 */
use crate::common::errors::AppError;
use crate::common::state::AppState;
use crate::config::BrowserMode;
use crate::domain::path::normalize;
use crate::domain::vfs::ReaddirOptions;
use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};

pub fn is_browser_user_agent(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.starts_with("Mozilla/"))
        .unwrap_or(false)
}

/// `/` → `/index.html`; a path ending in `/` gets `index.html` appended.
fn rewrite_for_index(raw_path: &str) -> String {
    if raw_path.is_empty() || raw_path == "/" {
        "/index.html".to_string()
    } else if raw_path.ends_with('/') {
        format!("{raw_path}index.html")
    } else {
        raw_path.to_string()
    }
}

fn http_date(mtime_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(mtime_ms)
        .unwrap_or_else(Utc::now)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub async fn serve(state: &AppState, raw_path: &str, headers: &HeaderMap) -> Result<Response, AppError> {
    let index_path = normalize(&rewrite_for_index(raw_path));

    if let Ok(stat) = state.vfs.stat(&index_path).await {
        if stat.is_file {
            if let Some(etag) = &stat.etag {
                if headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) == Some(etag.as_str()) {
                    return Ok(StatusCode::NOT_MODIFIED.into_response());
                }
            }
            if let Some(since) = headers.get(header::IF_MODIFIED_SINCE).and_then(|v| v.to_str().ok()) {
                if let Ok(since) = DateTime::parse_from_rfc2822(since) {
                    let mtime = DateTime::<Utc>::from_timestamp_millis(stat.mtime_ms).unwrap_or_else(Utc::now);
                    if since.with_timezone(&Utc) >= mtime {
                        return Ok(StatusCode::NOT_MODIFIED.into_response());
                    }
                }
            }

            let content = state.vfs.read_file(&index_path).await?;
            let mime = mime_guess::from_path(&index_path).first_or_octet_stream();
            let mut response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, mime.as_ref())
                .header(header::LAST_MODIFIED, http_date(stat.mtime_ms));
            if let Some(etag) = &stat.etag {
                response = response.header(header::ETAG, etag.clone());
            }
            return Ok(response.body(Body::from(content)).expect("response builder invariants are met"));
        }
    }

    match state.config.browser_mode {
        BrowserMode::List => render_listing(state, raw_path).await,
        _ => Err(AppError::status(StatusCode::NOT_FOUND, format!("no such file or directory: {raw_path}"))),
    }
}

async fn render_listing(state: &AppState, raw_path: &str) -> Result<Response, AppError> {
    let k = normalize(raw_path);
    let entries = state.vfs.readdir(&k, ReaddirOptions::default()).await?;

    let mut body = String::new();
    body.push_str("<!DOCTYPE html><html><body><ul>\n");
    if k != "/" {
        body.push_str("<li><a href=\"../\">..</a></li>\n");
    }
    for entry in &entries {
        let href = if entry.is_directory {
            format!("{}/", html_escape(&entry.name))
        } else {
            html_escape(&entry.name)
        };
        body.push_str(&format!("<li><a href=\"{href}\">{}</a></li>\n", html_escape(&entry.name)));
    }
    body.push_str("</ul></body></html>\n");

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .expect("response builder invariants are met"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_root_to_index() {
        assert_eq!(rewrite_for_index("/"), "/index.html");
        assert_eq!(rewrite_for_index(""), "/index.html");
    }

    #[test]
    fn rewrites_directory_paths() {
        assert_eq!(rewrite_for_index("/docs/"), "/docs/index.html");
    }

    #[test]
    fn leaves_file_paths_untouched() {
        assert_eq!(rewrite_for_index("/a.txt"), "/a.txt");
    }

    #[test]
    fn escapes_html_metacharacters() {
        assert_eq!(html_escape("<a>&\"'"), "&lt;a&gt;&amp;&quot;&#39;");
    }
}
