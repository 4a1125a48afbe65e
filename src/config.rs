/**
 * Configuration loading.
 *
 * All configuration is sourced from process environment variables, with
 * an optional `.env` file loaded first (same convenience the teacher's
 * bootstrap gave itself via `dotenv`). See spec §6 "Configuration" for
 * the enumerated options.
 */
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserMode {
    Disabled,
    Enabled,
    List,
}

impl BrowserMode {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "enabled" => BrowserMode::Enabled,
            "list" => BrowserMode::List,
            _ => BrowserMode::Disabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub table_name: String,
    pub browser_mode: BrowserMode,
    pub credentials: Option<(String, String)>,
    pub database_url: String,
    pub chunk_size: usize,
}

/// Default streaming chunk size, per spec §4.1 `createReadStream`.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        let table_name = env::var("TABLE_NAME").unwrap_or_else(|_| "filesystem".to_string());
        if !is_safe_identifier(&table_name) {
            anyhow::bail!("TABLE_NAME must be a plain SQL identifier, got {table_name:?}");
        }

        let browser_mode = env::var("BROWSER")
            .map(|v| BrowserMode::parse(&v))
            .unwrap_or(BrowserMode::Disabled);

        let credentials = match (env::var("USERNAME"), env::var("PASSWORD")) {
            (Ok(u), Ok(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        };

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let chunk_size = env::var("CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CHUNK_SIZE);

        Ok(Self {
            port,
            table_name,
            browser_mode,
            credentials,
            database_url,
            chunk_size,
        })
    }
}

/// Table names are interpolated directly into bootstrap DDL and query
/// text (sqlx has no bind-parameter support for identifiers), so we
/// only ever accept a closed alphabet here.
fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(is_safe_identifier("filesystem"));
        assert!(is_safe_identifier("_files2"));
        assert!(!is_safe_identifier("files; DROP TABLE x"));
        assert!(!is_safe_identifier("2files"));
        assert!(!is_safe_identifier(""));
    }

    #[test]
    fn browser_mode_parses_case_insensitively() {
        assert_eq!(BrowserMode::parse("List"), BrowserMode::List);
        assert_eq!(BrowserMode::parse("ENABLED"), BrowserMode::Enabled);
        assert_eq!(BrowserMode::parse("whatever"), BrowserMode::Disabled);
    }
}
