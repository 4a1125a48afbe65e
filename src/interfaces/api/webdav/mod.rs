/**
 * WebDAV protocol handler (spec §4.3): a single method-dispatch table
 * mapping inbound HTTP methods to VFS operations. Class-1 DAV only —
 * no LOCK/UNLOCK.
 */
pub mod headers;
pub mod xml;

use crate::application::copy_move::{self, Depth};
use crate::common::errors::AppError;
use crate::common::state::AppState;
use crate::domain::path::normalize;
use crate::domain::vfs::ReaddirOptions;
use crate::interfaces::api::browser;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use std::sync::Arc;

const STREAMING_THRESHOLD: u64 = 1024 * 1024;
const ALLOWED_METHODS: &str = "OPTIONS, PROPFIND, GET, PUT, DELETE, MKCOL, MOVE, COPY";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", any(dispatch_root))
        .route("/{*path}", any(dispatch))
}

async fn dispatch_root(state: State<Arc<AppState>>, request: Request) -> Response {
    handle(state, "/".to_string(), request).await
}

async fn dispatch(state: State<Arc<AppState>>, path: axum::extract::Path<String>, request: Request) -> Response {
    let raw = format!("/{}", path.0);
    handle(state, raw, request).await
}

async fn handle(State(state): State<Arc<AppState>>, raw_path: String, request: Request) -> Response {
    let method = request.method().clone();
    let result = route(&state, &method, &raw_path, request).await;
    match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn route(state: &Arc<AppState>, method: &Method, raw_path: &str, request: Request) -> Result<Response, AppError> {
    match method.as_str() {
        "OPTIONS" => Ok(handle_options()),
        "PROPFIND" => handle_propfind(state, raw_path).await,
        "GET" => handle_get(state, raw_path, &request).await,
        "PUT" => handle_put(state, raw_path, request).await,
        "DELETE" => handle_delete(state, raw_path).await,
        "MKCOL" => handle_mkcol(state, raw_path).await,
        "MOVE" => handle_move_or_copy(state, raw_path, request, true).await,
        "COPY" => handle_move_or_copy(state, raw_path, request, false).await,
        "PROPPATCH" => Ok(AppError::status(StatusCode::NOT_IMPLEMENTED, "PROPPATCH is not implemented").into_response()),
        _ => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
            response.headers_mut().insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
            Ok(response)
        }
    }
}

fn handle_options() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ALLOW, ALLOWED_METHODS)
        .header("DAV", "1")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", ALLOWED_METHODS)
        .header("Access-Control-Allow-Headers", "Authorization, Content-Type, Depth, Destination, Overwrite")
        .body(Body::empty())
        .expect("response builder invariants are met")
}

async fn handle_propfind(state: &Arc<AppState>, raw_path: &str) -> Result<Response, AppError> {
    let path = normalize(raw_path);

    let target_stat = match state.vfs.stat(&path).await {
        Ok(s) => Some(s),
        Err(e) if e.is_enoent() && path == "/" => None,
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    if let Some(stat) = &target_stat {
        let href = if stat.is_directory { dir_href(&path) } else { path.clone() };
        entries.push(xml::PropfindEntry {
            href,
            is_directory: stat.is_directory,
            size: stat.size,
            mtime_ms: stat.mtime_ms,
        });

        if stat.is_directory {
            let children = state.vfs.readdir(&path, ReaddirOptions::default()).await?;
            for child in &children {
                let child_path = child.path();
                let child_stat = state.vfs.stat(&child_path).await?;
                let href = if child_stat.is_directory { dir_href(&child_path) } else { child_path };
                entries.push(xml::PropfindEntry {
                    href,
                    is_directory: child_stat.is_directory,
                    size: child_stat.size,
                    mtime_ms: child_stat.mtime_ms,
                });
            }
        }
    }

    let body = xml::propfind_multistatus(&entries);
    Ok(Response::builder()
        .status(StatusCode::MULTI_STATUS)
        .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .body(Body::from(body))
        .expect("response builder invariants are met"))
}

fn dir_href(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

async fn handle_get(state: &Arc<AppState>, raw_path: &str, request: &Request) -> Result<Response, AppError> {
    if browser::is_browser_user_agent(request.headers()) && !matches!(state.config.browser_mode, crate::config::BrowserMode::Disabled) {
        return browser::serve(state, raw_path, request.headers()).await;
    }

    let path = normalize(raw_path);
    let stat = state.vfs.stat(&path).await?;
    if stat.is_directory {
        return Err(AppError::status(StatusCode::NOT_FOUND, format!("is a directory: {path}")));
    }

    let filename = path.rsplit('/').next().unwrap_or("file");
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\""));
    if let Some(etag) = &stat.etag {
        builder = builder.header(header::ETAG, etag.clone());
    }

    if stat.size > STREAMING_THRESHOLD {
        let stream = state.vfs.create_read_stream(&path, state.config.chunk_size).await?;
        let body = Body::from_stream(stream);
        Ok(builder.body(body).expect("response builder invariants are met"))
    } else {
        let content = state.vfs.read_file(&path).await?;
        Ok(builder.body(Body::from(content)).expect("response builder invariants are met"))
    }
}

async fn handle_put(state: &Arc<AppState>, raw_path: &str, request: Request) -> Result<Response, AppError> {
    let path = normalize(raw_path);
    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| AppError::status(StatusCode::BAD_REQUEST, format!("failed to read request body: {e}")))?;

    let existed = state.vfs.stat(&path).await.is_ok();
    state.vfs.write_file(&path, body).await?;

    let status = if existed { StatusCode::NO_CONTENT } else { StatusCode::CREATED };
    Ok(status.into_response())
}

async fn handle_delete(state: &Arc<AppState>, raw_path: &str) -> Result<Response, AppError> {
    let path = normalize(raw_path);
    state.vfs.rm(&path, true, true).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn handle_mkcol(state: &Arc<AppState>, raw_path: &str) -> Result<Response, AppError> {
    let path = normalize(raw_path);
    state.vfs.mkdir(&path, true).await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn handle_move_or_copy(state: &Arc<AppState>, raw_path: &str, request: Request, is_move: bool) -> Result<Response, AppError> {
    let request_origin = headers::request_origin(request.headers());

    let dest = headers::parse_destination(request.headers(), &request_origin)?;
    let depth = headers::parse_depth(request.headers());
    let overwrite = headers::parse_overwrite(request.headers());
    let src = normalize(raw_path);

    let outcome = if is_move {
        copy_move::mv(state.vfs.as_ref(), &src, &dest, depth, overwrite).await?
    } else {
        copy_move::copy(state.vfs.as_ref(), &src, &dest, depth, overwrite).await?
    };

    if !outcome.errors.is_empty() {
        let body = xml::errors_multistatus(&outcome.errors);
        return Ok(Response::builder()
            .status(StatusCode::MULTI_STATUS)
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(Body::from(body))
            .expect("response builder invariants are met"));
    }

    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::NO_CONTENT };
    let mut response = Response::builder().status(status);
    if outcome.created {
        response = response.header(header::LOCATION, dest.clone());
    }
    Ok(response.body(Body::empty()).expect("response builder invariants are met"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::infrastructure::repositories::memory_vfs::MemVfs;
    use axum::body::to_bytes;
    use axum::http::{HeaderValue, Request as HttpRequest};
    use bytes::Bytes;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            vfs: Arc::new(MemVfs::new()),
            config: Arc::new(AppConfig {
                port: 3000,
                table_name: "filesystem".to_string(),
                browser_mode: crate::config::BrowserMode::Disabled,
                credentials: None,
                database_url: String::new(),
                chunk_size: 1024 * 1024,
            }),
        })
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_with_etag() {
        let state = test_state();
        let app = router().with_state(state.clone());

        let put_req = HttpRequest::builder()
            .method("PUT")
            .uri("/hello.txt")
            .body(Body::from("hi"))
            .unwrap();
        let put_res = app.clone().oneshot(put_req).await.unwrap();
        assert_eq!(put_res.status(), StatusCode::CREATED);

        let get_req = HttpRequest::builder().method("GET").uri("/hello.txt").body(Body::empty()).unwrap();
        let get_res = app.clone().oneshot(get_req).await.unwrap();
        assert_eq!(get_res.status(), StatusCode::OK);
        let etag = get_res.headers().get(header::ETAG).cloned();
        let body = to_bytes(get_res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"hi"));
        assert!(etag.is_some());

        let mut conditional = HttpRequest::builder().method("GET").uri("/hello.txt");
        conditional = conditional.header(header::IF_NONE_MATCH, etag.unwrap());
        let conditional_res = app.oneshot(conditional.body(Body::empty()).unwrap()).await.unwrap();
        // browser mode is disabled, so conditional GET headers are only
        // honored by the browser-index path; a plain GET always serves.
        assert_eq!(conditional_res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mkcol_then_delete_then_propfind_404() {
        let state = test_state();
        let app = router().with_state(state.clone());

        let mkcol = HttpRequest::builder().method("MKCOL").uri("/d").body(Body::empty()).unwrap();
        assert_eq!(app.clone().oneshot(mkcol).await.unwrap().status(), StatusCode::CREATED);

        let mkcol_again = HttpRequest::builder().method("MKCOL").uri("/d").body(Body::empty()).unwrap();
        assert_eq!(app.clone().oneshot(mkcol_again).await.unwrap().status(), StatusCode::BAD_REQUEST);

        let delete = HttpRequest::builder().method("DELETE").uri("/d").body(Body::empty()).unwrap();
        assert_eq!(app.clone().oneshot(delete).await.unwrap().status(), StatusCode::NO_CONTENT);

        let propfind = HttpRequest::builder().method("PROPFIND").uri("/d").body(Body::empty()).unwrap();
        assert_eq!(app.oneshot(propfind).await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn move_self_containment_returns_403() {
        let state = test_state();
        let app = router().with_state(state.clone());

        let mkcol = HttpRequest::builder().method("MKCOL").uri("/a").body(Body::empty()).unwrap();
        app.clone().oneshot(mkcol).await.unwrap();

        let mv = HttpRequest::builder()
            .method("MOVE")
            .uri("/a")
            .header("Destination", HeaderValue::from_static("http://example.com/a/sub"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(mv).await.unwrap().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn move_to_a_foreign_destination_origin_returns_502() {
        let state = test_state();
        let app = router().with_state(state.clone());

        let put = HttpRequest::builder().method("PUT").uri("/a.txt").body(Body::from("a")).unwrap();
        app.clone().oneshot(put).await.unwrap();

        let mv = HttpRequest::builder()
            .method("MOVE")
            .uri("/a.txt")
            .header(header::HOST, HeaderValue::from_static("example.com"))
            .header("Destination", HeaderValue::from_static("http://evil.example/a.txt"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(mv).await.unwrap().status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn propfind_lists_nested_directory_children() {
        let state = test_state();
        let app = router().with_state(state.clone());

        let put = HttpRequest::builder()
            .method("PUT")
            .uri("/a/b/c.bin")
            .body(Body::from(vec![0u8, 1, 2]))
            .unwrap();
        assert_eq!(app.clone().oneshot(put).await.unwrap().status(), StatusCode::CREATED);

        let propfind_a = HttpRequest::builder().method("PROPFIND").uri("/a").body(Body::empty()).unwrap();
        let res = app.clone().oneshot(propfind_a).await.unwrap();
        assert_eq!(res.status(), StatusCode::MULTI_STATUS);
        let body = String::from_utf8(to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
        assert!(body.contains("<d:href>/a/b/</d:href>"));
        assert!(body.contains("<d:collection"));

        let propfind_ab = HttpRequest::builder().method("PROPFIND").uri("/a/b").body(Body::empty()).unwrap();
        let res = app.oneshot(propfind_ab).await.unwrap();
        let body = String::from_utf8(to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
        assert!(body.contains("<d:href>/a/b/c.bin</d:href>"));
        assert!(body.contains("<d:getcontentlength>3</d:getcontentlength>"));
    }

    #[tokio::test]
    async fn get_streams_bodies_above_the_threshold() {
        let state = test_state();
        let app = router().with_state(state.clone());

        let big = vec![7u8; 2 * 1024 * 1024];
        let put = HttpRequest::builder().method("PUT").uri("/big").body(Body::from(big.clone())).unwrap();
        assert_eq!(app.clone().oneshot(put).await.unwrap().status(), StatusCode::CREATED);

        let get = HttpRequest::builder().method("GET").uri("/big").body(Body::empty()).unwrap();
        let res = app.oneshot(get).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.len(), big.len());
    }

    #[tokio::test]
    async fn copy_directory_then_overwrite_f_returns_412() {
        let state = test_state();
        let app = router().with_state(state.clone());

        let put = HttpRequest::builder().method("PUT").uri("/x/y.txt").body(Body::from("Y")).unwrap();
        app.clone().oneshot(put).await.unwrap();

        let copy = HttpRequest::builder()
            .method("COPY")
            .uri("/x")
            .header("Destination", HeaderValue::from_static("http://example.com/z"))
            .header("Depth", HeaderValue::from_static("infinity"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.clone().oneshot(copy).await.unwrap().status(), StatusCode::CREATED);

        let get = HttpRequest::builder().method("GET").uri("/z/y.txt").body(Body::empty()).unwrap();
        let res = app.clone().oneshot(get).await.unwrap();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"Y"));

        let copy_again = HttpRequest::builder()
            .method("COPY")
            .uri("/x")
            .header("Destination", HeaderValue::from_static("http://example.com/z"))
            .header("Overwrite", HeaderValue::from_static("F"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(copy_again).await.unwrap().status(), StatusCode::PRECONDITION_FAILED);
    }
}
