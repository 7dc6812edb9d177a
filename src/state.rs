//! Shared state for the proxy handler.

use std::sync::Arc;

use crate::proxy::{ProxyTarget, Transport};

/// Cloneable per-request view of the proxy configuration.
///
/// Both fields are read-only after startup, so handlers share them without locking.
#[derive(Clone)]
pub struct ProxyState {
    pub target: Arc<ProxyTarget>,
    pub transport: Arc<dyn Transport>,
}

impl ProxyState {
    pub fn new<T: Transport + 'static>(target: ProxyTarget, transport: T) -> Self {
        Self {
            target: Arc::new(target),
            transport: Arc::new(transport),
        }
    }
}
