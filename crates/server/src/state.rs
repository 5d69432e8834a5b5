use std::sync::Arc;

use devmate_config::Config;
use devmate_provider::{ClientFactory, ModelClientFactory};

/// Shared per-process state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Owns the gateway token manager, so one is shared by all requests.
    pub clients: Arc<dyn ModelClientFactory>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let clients = Arc::new(ClientFactory::new(config.provider.clone()));
        Self::with_clients(config, clients)
    }

    pub fn with_clients(config: Config, clients: Arc<dyn ModelClientFactory>) -> Self {
        Self {
            config: Arc::new(config),
            clients,
        }
    }
}
