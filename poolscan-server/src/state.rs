//! Application state shared across all request handlers.

use poolscan_core::processors::ChainSetCoordinator;
use sqlx::PgPool;
use std::sync::Arc;

/// Cloneable handle to everything the handlers need.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub coordinator: Arc<ChainSetCoordinator>,
}

impl AppState {
    pub fn new(db: PgPool, coordinator: ChainSetCoordinator) -> Self {
        Self {
            db,
            coordinator: Arc::new(coordinator),
        }
    }
}
