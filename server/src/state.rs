//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the factory that builds each connection's method registry and the
//! live connection count that drives idle shutdown.

use std::sync::Arc;

use crate::app::App;
use crate::connections::Connections;

/// Builds the method registry for one connection.
pub type AppFactory = Arc<dyn Fn() -> App + Send + Sync>;

/// Clone is required by Axum; every field is Arc-backed.
#[derive(Clone)]
pub struct AppState {
    pub factory: AppFactory,
    pub connections: Connections,
}

impl AppState {
    #[must_use]
    pub fn new(factory: AppFactory) -> Self {
        Self { factory, connections: Connections::new() }
    }
}
