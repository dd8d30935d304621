use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::models::ListWindow;
use crate::stream::{Delta, StreamHandle};

use super::Services;

const UNKNOWN_MODEL: &str = "AI";

/// Restores the session on startup: loads chats and reattaches to every
/// stream the ledger still records.
pub struct Bootstrapper {
    services: Services,
    started: AtomicBool,
}

impl Bootstrapper {
    pub fn new(services: Services) -> Self {
        Self { services, started: AtomicBool::new(false) }
    }

    /// Runs once per process. Returns the handles of the resumed streams.
    pub async fn run(&self, window: ListWindow) -> AppResult<Vec<StreamHandle>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::AlreadyBootstrapped);
        }

        if let Err(e) = self.services.ensure_models().await {
            warn!("Could not load models, resumed streams will lack a provider: {e}");
        }

        let chats = match self.services.api.list_chats(window).await {
            Ok(chats) => chats,
            Err(e) => {
                self.services.session.lock().set_chats_error(e.to_string());
                return Err(e);
            }
        };

        let mut handles = Vec::new();
        for chat in chats {
            let chat_id = chat.id.clone();
            self.services.session.lock().initialize_chat(chat, None);
            match self.resume(&chat_id) {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => {}
                Err(e) => warn!("Could not resume the stream of chat {chat_id}: {e}"),
            }
        }
        self.services.session.lock().finish_fetching_chats();

        info!("Session restored, {} stream(s) resumed", handles.len());
        Ok(handles)
    }

    fn resume(&self, chat_id: &str) -> AppResult<Option<StreamHandle>> {
        let Some(entry) = self.services.ledger.load(chat_id)? else {
            return Ok(None);
        };
        let model = entry.model.unwrap_or_else(|| UNKNOWN_MODEL.to_string());

        {
            let mut session = self.services.session.lock();
            session.init_pending_message(
                chat_id,
                model.clone(),
                entry.search,
                entry.memory.map(|m| m.content),
            )?;
            session.update_pending_message(
                chat_id,
                &Delta { content: entry.content, reasoning: entry.reasoning, role: None },
            )?;
        }

        let provider = self
            .services
            .service
            .lock()
            .find_model(&model)
            .map(|m| m.base_url.clone());
        if provider.is_none() {
            warn!("Chat {chat_id}: model '{model}' is unknown, inference errors will not be attributed");
        }

        info!("Resuming stream {} for chat {chat_id}", entry.stream_id);
        let observer = self.services.observer(chat_id, provider);
        Ok(Some(self.services.streams.open_stream(&entry.stream_id, observer)))
    }
}
