pub mod aws_clients;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod lifecycle;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod startup;
pub mod storage;

use crate::domain::MediaStorage;
use crate::lifecycle::StoryLifecycleManager;
use std::sync::Arc;

/// Shared resources for the web server.
#[derive(Clone)]
pub struct AppState {
    pub stories: StoryLifecycleManager,
    pub media: Arc<dyn MediaStorage>,
}
