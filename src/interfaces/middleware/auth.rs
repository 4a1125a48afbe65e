/**
 * Basic-auth gate (spec §4.6). Optional: when no credentials are
 * configured the middleware is not installed at all (see `main.rs`).
 * Browser static-serve requests are allowed to bypass auth by design.
 */
use crate::config::{AppConfig, BrowserMode};
use crate::interfaces::api::browser::is_browser_user_agent;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use std::sync::Arc;

fn unauthorized() -> Response {
    let mut res = Response::new("unauthorized".into());
    *res.status_mut() = StatusCode::UNAUTHORIZED;
    res.headers_mut().insert(header::WWW_AUTHENTICATE, "Basic realm=\"\"".parse().unwrap());
    res
}

/// Decodes `Authorization: Basic <token>` into `(user, pass)`. The
/// token alphabet accepts both standard (`+/`) and URL-safe (`-_`)
/// base64, per spec §4.6.
fn decode_basic(header_value: &str) -> Option<(String, String)> {
    let token = header_value.strip_prefix("Basic ")?;
    let decoded = STANDARD
        .decode(token)
        .or_else(|_| URL_SAFE.decode(token))
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// True for the one case spec §4.6 carves the gate out for: a browser's
/// `GET` when the optional static-serve index is turned on at all
/// (`handle_get` routes these to `browser::serve` regardless of auth).
fn is_browser_bypass(config: &AppConfig, request: &Request) -> bool {
    request.method() == Method::GET
        && !matches!(config.browser_mode, BrowserMode::Disabled)
        && is_browser_user_agent(request.headers())
}

pub async fn require_basic_auth(State(config): State<Arc<AppConfig>>, request: Request, next: Next) -> Response {
    let Some((expected_user, expected_pass)) = &config.credentials else {
        return next.run(request).await;
    };

    if is_browser_bypass(&config, &request) {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic);

    match provided {
        Some((user, pass)) if &user == expected_user && &pass == expected_pass => next.run(request).await,
        _ => unauthorized(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config_with(browser_mode: BrowserMode) -> AppConfig {
        AppConfig {
            port: 3000,
            table_name: "filesystem".to_string(),
            browser_mode,
            credentials: Some(("alice".to_string(), "secret".to_string())),
            database_url: String::new(),
            chunk_size: 1024 * 1024,
        }
    }

    fn browser_get() -> Request {
        Request::builder()
            .method("GET")
            .uri("/index.html")
            .header(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0"))
            .body(axum::body::Body::empty())
            .unwrap()
    }

    #[test]
    fn browser_get_bypasses_auth_when_browser_mode_enabled() {
        let config = config_with(BrowserMode::Enabled);
        assert!(is_browser_bypass(&config, &browser_get()));
    }

    #[test]
    fn browser_get_does_not_bypass_auth_when_browser_mode_disabled() {
        let config = config_with(BrowserMode::Disabled);
        assert!(!is_browser_bypass(&config, &browser_get()));
    }

    #[test]
    fn non_browser_get_does_not_bypass_auth() {
        let config = config_with(BrowserMode::Enabled);
        let request = Request::builder().method("GET").uri("/a.txt").body(axum::body::Body::empty()).unwrap();
        assert!(!is_browser_bypass(&config, &request));
    }

    #[test]
    fn put_from_a_browser_user_agent_does_not_bypass_auth() {
        let config = config_with(BrowserMode::List);
        let request = Request::builder()
            .method("PUT")
            .uri("/a.txt")
            .header(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0"))
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(!is_browser_bypass(&config, &request));
    }

    #[test]
    fn decodes_standard_base64_credentials() {
        let header = format!("Basic {}", STANDARD.encode("alice:secret"));
        assert_eq!(decode_basic(&header), Some(("alice".to_string(), "secret".to_string())));
    }

    #[test]
    fn decodes_url_safe_base64_credentials() {
        let header = format!("Basic {}", URL_SAFE.encode("alice:se+c/ret"));
        assert_eq!(decode_basic(&header), Some(("alice".to_string(), "se+c/ret".to_string())));
    }

    #[test]
    fn rejects_missing_basic_prefix() {
        assert_eq!(decode_basic("Bearer abc"), None);
    }
}
