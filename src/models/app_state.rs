use crate::config::ServerConfig;
use crate::session::directory::SessionDirectory;

/// Application state shared between connections
#[derive(Clone, Default)]
pub struct AppState {
    pub directory: SessionDirectory,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            directory: SessionDirectory::new(),
            config,
        }
    }
}
