use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::models::{Chat, ListWindow, Memory, Model, ReasoningEffort, SendMessagePayload};
use crate::state::provider_key;
use crate::stream::StreamHandle;

use super::Services;

/// What the user typed plus the toggles of the compose box.
#[derive(Debug, Clone, Default)]
pub struct ComposeRequest {
    pub message: String,
    pub reasoning: Option<ReasoningEffort>,
    pub use_search: bool,
    pub use_memories: bool,
}

impl ComposeRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Self::default() }
    }
}

#[derive(Debug)]
pub struct SendOutcome {
    pub chat_id: String,
    /// Whether the chat was created by this send.
    pub created: bool,
    pub stream: StreamHandle,
}

/// Clears the in-flight flag when the send finishes, however it finishes.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> AppResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::RequestInFlight)?;
        Ok(Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// User-initiated operations: sending, paging, renaming and deleting chats,
/// and managing memories.
pub struct ComposeService {
    services: Services,
    in_flight: AtomicBool,
}

impl ComposeService {
    pub fn new(services: Services) -> Self {
        Self { services, in_flight: AtomicBool::new(false) }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn send_message(
        &self,
        chat_id: Option<&str>,
        model: &Model,
        request: ComposeRequest,
    ) -> AppResult<SendOutcome> {
        // ── Validation ────────────────────────────────────────────────────────
        let message = request.message.trim();
        if message.is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        let _guard = InFlightGuard::acquire(&self.in_flight)?;

        if let Some(chat_id) = chat_id {
            if self.services.session.lock().is_streaming(chat_id) {
                return Err(AppError::PendingMessageExists { chat_id: chat_id.to_string() });
            }
        }

        // ── Resolve or create chat ────────────────────────────────────────────
        let (chat_id, created) = match chat_id {
            Some(chat_id) => (chat_id.to_string(), false),
            None => {
                let chat = self.services.api.create_chat().await?;
                let chat_id = chat.id.clone();
                let mut session = self.services.session.lock();
                session.initialize_chat(chat, Some(Vec::new()));
                session.bring_to_front(&chat_id);
                session.set_active_chat(Some(chat_id.clone()));
                (chat_id, true)
            }
        };

        // ── Post the user message ─────────────────────────────────────────────
        let payload = SendMessagePayload {
            message: message.to_string(),
            model: model.identifier.clone(),
            reasoning: request.reasoning,
            use_search: request.use_search,
            use_memories: request.use_memories,
        };
        let created_message = self.services.api.create_message(&chat_id, &payload).await?;
        let stream_id = created_message.stream_id;

        {
            let mut session = self.services.session.lock();
            if session.chat(&chat_id).is_none() {
                session.initialize_chat(Chat::new(chat_id.clone()), None);
            }
            session.add_chat_messages(&chat_id, vec![created_message.user_message])?;
            session.init_pending_message(&chat_id, model.name.clone(), request.use_search, None)?;
        }

        // ── Record the stream and attach to it ────────────────────────────────
        if let Err(e) = self
            .services
            .ledger
            .begin(&chat_id, &stream_id, &model.name, request.use_search)
        {
            warn!("Chat {chat_id}: stream {stream_id} will not survive a restart: {e}");
        }
        if let Err(e) = self.services.ledger.remember_model(&chat_id, &model.name) {
            warn!("Chat {chat_id}: could not remember model: {e}");
        }
        self.services
            .service
            .lock()
            .clear_inference_error(&provider_key(&model.base_url));

        info!("Chat {chat_id}: streaming reply {stream_id} from {}", model.name);
        let observer = self.services.observer(&chat_id, Some(model.base_url.clone()));
        let stream = self.services.streams.open_stream(&stream_id, observer);

        Ok(SendOutcome { chat_id, created, stream })
    }

    /// Loads the newest page of a chat's messages, driving its list state.
    /// Fetch failures end in `ListState::Error` rather than an `Err`.
    pub async fn load_messages(&self, chat_id: &str) -> AppResult<()> {
        if !self.services.session.lock().begin_fetch(chat_id)? {
            debug!("Chat {chat_id}: messages already loaded or loading");
            return Ok(());
        }

        let window = ListWindow::first(self.services.page_size);
        let result = match self.services.api.fetch_chat_messages(chat_id, window).await {
            Ok(messages) => Ok(messages),
            Err(AppError::Backend { message }) => Err(message),
            Err(e) => Err(e.to_string()),
        };
        self.services.session.lock().finish_fetch(chat_id, result)
    }

    /// Fetches the page behind the loaded messages. Returns how many
    /// messages the page held; zero means the history is exhausted.
    pub async fn load_older_messages(&self, chat_id: &str) -> AppResult<usize> {
        let start = self
            .services
            .session
            .lock()
            .messages(chat_id)
            .map(<[_]>::len)
            .ok_or_else(|| AppError::chat_not_found(chat_id))?;

        let window = ListWindow { start, take: self.services.page_size };
        let older = self.services.api.fetch_chat_messages(chat_id, window).await?;
        let count = older.len();
        self.services.session.lock().prepend_chat_messages(chat_id, older)?;
        Ok(count)
    }

    pub async fn rename_chat(&self, chat_id: &str, name: &str) -> AppResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::EmptyField { field_name: "name".to_string() });
        }
        self.services.api.rename_chat(chat_id, name).await?;
        self.services.session.lock().rename_chat(chat_id, name)
    }

    /// Deletes a chat on the server and locally. A streaming chat is refused
    /// before any request is made.
    pub async fn delete_chat(&self, chat_id: &str) -> AppResult<()> {
        if self.services.session.lock().is_streaming(chat_id) {
            return Err(AppError::ChatStreaming { chat_id: chat_id.to_string() });
        }
        self.services.api.delete_chat(chat_id).await?;
        self.services.session.lock().delete_chat(chat_id);
        Ok(())
    }

    pub async fn load_memories(&self) -> AppResult<Vec<Memory>> {
        let memories = self.services.api.list_memories().await?;
        self.services.memories.lock().set_memories(memories.clone());
        Ok(memories)
    }

    pub async fn remove_memory(&self, id: &str) -> AppResult<()> {
        self.services.api.remove_memory(id).await?;
        self.services.memories.lock().remove_memory(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        let guard = InFlightGuard::acquire(&flag).unwrap();
        assert!(matches!(InFlightGuard::acquire(&flag), Err(AppError::RequestInFlight)));
        drop(guard);
        assert!(InFlightGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn compose_request_defaults_are_off() {
        let request = ComposeRequest::new("Hello");
        assert_eq!(request.message, "Hello");
        assert!(!request.use_search && !request.use_memories);
        assert!(request.reasoning.is_none());
    }
}
