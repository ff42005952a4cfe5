use std::sync::Arc;

use crate::service::RemovalService;

/// Shared application state available to all handlers via `State<AppState>`
///
/// Cheap to clone; the service sits behind an `Arc`.
#[derive(Clone, Debug)]
pub struct AppState {
    pub service: Arc<RemovalService>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<RemovalService>) -> Self {
        Self { service }
    }
}
