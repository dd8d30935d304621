//! Orchestration on top of the API client, the stores and the stream client.

pub mod bootstrap;
pub mod compose;
pub mod session_observer;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::errors::AppResult;
use crate::ledger::StreamLedger;
use crate::models::ModelCatalog;
use crate::state::{
    ChatSessionStore, MemoryStore, ServiceStore, SharedMemoryStore, SharedServiceStore,
    SharedSessionStore,
};
use crate::stream::CompletionStreamClient;

pub use bootstrap::Bootstrapper;
pub use compose::{ComposeRequest, ComposeService, SendOutcome};
pub use session_observer::SessionStreamObserver;

/// Everything the orchestrators share. Cloning is cheap; clones see the same
/// stores.
#[derive(Clone)]
pub struct Services {
    pub api: ApiClient,
    pub streams: CompletionStreamClient,
    pub ledger: StreamLedger,
    pub session: SharedSessionStore,
    pub service: SharedServiceStore,
    pub memories: SharedMemoryStore,
    pub page_size: usize,
}

impl Services {
    pub fn new(api: ApiClient, streams: CompletionStreamClient, ledger: StreamLedger) -> Self {
        Self {
            api,
            streams,
            ledger,
            session: Arc::new(Mutex::new(ChatSessionStore::new())),
            service: Arc::new(Mutex::new(ServiceStore::new())),
            memories: Arc::new(Mutex::new(MemoryStore::new())),
            page_size: ClientConfig::default().page_size,
        }
    }

    pub fn from_config(config: &ClientConfig, ledger: StreamLedger) -> AppResult<Self> {
        let api = ApiClient::new(&config.backend_uri, config.session_cookie.as_deref())?;
        let streams = api
            .stream_client()
            .with_retry_policy(config.max_retries, config.retry_delay);
        let mut services = Self::new(api, streams, ledger);
        services.page_size = config.page_size;
        Ok(services)
    }

    /// Observer that applies the events of `chat_id`'s stream to the stores.
    pub fn observer(&self, chat_id: &str, provider: Option<String>) -> SessionStreamObserver {
        SessionStreamObserver::new(chat_id, self.clone(), provider)
    }

    /// Loads the model catalog unless it is already known.
    pub async fn ensure_models(&self) -> AppResult<ModelCatalog> {
        let known = self.service.lock().models().cloned();
        if let Some(models) = known {
            return Ok(models);
        }
        let models = self.api.list_models().await?;
        if models.free.is_empty() && models.paid.is_empty() {
            warn!("Backend advertises no models");
        }
        self.service.lock().set_models(models.clone());
        Ok(models)
    }
}
