//! Shared application state for the Axum server.

use std::sync::Arc;

use herald_notifier::{ChannelServer, RealtimeHub, ServiceContext};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ServiceContext>,
    pub hub: Arc<RealtimeHub>,
}

impl AppState {
    /// Wrap the service context and install a fresh hub as its channel server.
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        let hub = Arc::new(RealtimeHub::new());
        ctx.channels().install(hub.clone() as Arc<dyn ChannelServer>);
        Self { ctx, hub }
    }
}
