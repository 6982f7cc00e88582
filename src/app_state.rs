use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::services::registry::Providers;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub providers: Arc<Providers>,
    /// Outbound client for fetching remote source images.
    pub http: Client,
    pub public_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(providers: Providers, http: Client, public_dir: PathBuf) -> Self {
        Self {
            providers: Arc::new(providers),
            http,
            public_dir: Arc::new(public_dir),
        }
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }
}
