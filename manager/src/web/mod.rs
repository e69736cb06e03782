//! Monitoring HTTP surface
//!
//! Read-only views of the repair jobs plus one write: queueing an on-demand
//! repair. Every response uses the [`handlers::ApiResponse`] envelope.

pub mod handlers;
pub mod server;

pub use server::{create_router, start_web_server};

use std::sync::Arc;

use crate::config::Config;
use crate::scheduler::RepairScheduler;

// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: RepairScheduler,
}

impl AppState {
    pub fn new(config: Arc<Config>, scheduler: RepairScheduler) -> Self {
        Self { config, scheduler }
    }
}
