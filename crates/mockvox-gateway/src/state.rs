//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};

use mockvox_core::config::Config;
use mockvox_core::content::ContentStore;
use mockvox_interview::{PromptPicker, RngPicker};

use crate::services::{OpenAiServiceFactory, ServiceFactory};

pub type PickerFactory = Arc<dyn Fn() -> Box<dyn PromptPicker> + Send + Sync>;

/// Shared gateway state accessible from all connections and handlers.
///
/// Holds only read-only configuration and the connection registry. Interview
/// progress lives in each connection's own session.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub content: Arc<ContentStore>,
    pub services: Arc<dyn ServiceFactory>,
    pub pickers: PickerFactory,
    pub connections: RwLock<HashMap<String, ConnectionState>>,
}

/// Per-connection state.
pub struct ConnectionState {
    pub conn_id: String,
    pub event_tx: mpsc::UnboundedSender<String>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, content: Arc<ContentStore>) -> Self {
        let services = Arc::new(OpenAiServiceFactory::new(config.clone()));
        Self::with_services(config, content, services)
    }

    pub fn with_services(
        config: Arc<Config>,
        content: Arc<ContentStore>,
        services: Arc<dyn ServiceFactory>,
    ) -> Self {
        Self {
            config,
            content,
            services,
            pickers: Arc::new(|| Box::new(RngPicker::from_os_rng())),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the prompt picker source (deterministic tests).
    pub fn with_pickers(mut self, pickers: PickerFactory) -> Self {
        self.pickers = pickers;
        self
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
