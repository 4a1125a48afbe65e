use crate::config::AppConfig;
use crate::domain::vfs::Vfs;
use std::sync::Arc;

/// Shared application state injected into every handler (teacher's
/// `AppState` convention, trimmed to what this server actually needs).
#[derive(Clone)]
pub struct AppState {
    pub vfs: Arc<dyn Vfs>,
    pub config: Arc<AppConfig>,
}
