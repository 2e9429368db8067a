//! Application state for the configuration server

use std::sync::Arc;

use crate::server::ConfigServer;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    server: Arc<ConfigServer>,
}

impl AppState {
    pub fn new(server: ConfigServer) -> Self {
        Self {
            server: Arc::new(server),
        }
    }

    pub fn server(&self) -> &ConfigServer {
        &self.server
    }
}
