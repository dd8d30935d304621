use tracing::{debug, info, warn};

use crate::errors::AppResult;
use crate::models::ChatMessage;
use crate::state::provider_key;
use crate::stream::{ControlEvent, Delta, StreamObserver};

use super::Services;

/// Applies one chat's stream events to the session store, the service and
/// memory stores, and the ledger.
///
/// Store and ledger failures are logged; the stream keeps being consumed.
pub struct SessionStreamObserver {
    chat_id: String,
    services: Services,
    /// `base_url` of the model producing the reply, when known.
    provider: Option<String>,
}

impl SessionStreamObserver {
    pub fn new(chat_id: impl Into<String>, services: Services, provider: Option<String>) -> Self {
        Self { chat_id: chat_id.into(), services, provider }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    fn log_failure(&self, what: &str, result: AppResult<()>) {
        if let Err(e) = result {
            warn!("Chat {}: failed to {what}: {e}", self.chat_id);
        }
    }

    /// Drops the pending message and its ledger record. `reply`, when given,
    /// joins the message list under the same lock the pending message is
    /// cleared with.
    fn finish_pending(&self, reply: Option<ChatMessage>) {
        self.log_failure("clear the ledger", self.services.ledger.clear(&self.chat_id));

        let mut session = self.services.session.lock();
        let cleared = session.clear_pending_message(&self.chat_id);
        let added = match reply {
            Some(message) => session.add_chat_messages(&self.chat_id, vec![message]),
            None => Ok(()),
        };
        drop(session);

        self.log_failure("clear the pending message", cleared.map(|_| ()));
        self.log_failure("store the reply", added);
    }
}

impl StreamObserver for SessionStreamObserver {
    fn on_delta(&mut self, delta: Delta) {
        let updated = self
            .services
            .session
            .lock()
            .update_pending_message(&self.chat_id, &delta);
        if let Err(e) = updated {
            warn!("Chat {}: failed to apply a delta: {e}", self.chat_id);
            return;
        }

        let recorded = self.services.ledger.append_delta(
            &self.chat_id,
            &delta.content,
            delta.reasoning.as_deref(),
        );
        self.log_failure("record a delta", recorded);
    }

    fn on_control(&mut self, control: ControlEvent) {
        match control {
            ControlEvent::WebSearchPerformed => {
                debug!("Chat {}: web search finished", self.chat_id);
                self.log_failure("record the search", self.services.ledger.finish_search(&self.chat_id));
                let finished = self.services.session.lock().finish_web_search(&self.chat_id);
                self.log_failure("finish the search", finished);
            }
            ControlEvent::ChatNameUpdated { name } => {
                let renamed = self.services.session.lock().update_chat_name(&self.chat_id, name);
                self.log_failure("rename the chat", renamed);
            }
            ControlEvent::MemoryAdded { memory } => {
                let updated = self
                    .services
                    .session
                    .lock()
                    .update_pending_message_memory(&self.chat_id, memory.content.clone());
                if let Err(e) = updated {
                    warn!("Chat {}: failed to attach the memory: {e}", self.chat_id);
                    return;
                }
                self.services.memories.lock().add_memory(memory.clone());
                let recorded = self.services.ledger.record_memory(&self.chat_id, &memory);
                self.log_failure("record the memory", recorded);
            }
            ControlEvent::InferenceError { code } => {
                match self.provider.as_deref().map(provider_key) {
                    Some(key) => {
                        warn!("Chat {}: provider {key} failed with {code}", self.chat_id);
                        self.services.service.lock().set_inference_error(key, code);
                    }
                    None => warn!(
                        "Chat {}: inference failed with {code} for an unknown provider",
                        self.chat_id
                    ),
                }
                self.finish_pending(None);
            }
        }
    }

    fn on_done(&mut self, message: ChatMessage) {
        info!("Chat {}: reply {} complete", self.chat_id, message.id);
        self.finish_pending(Some(message));
    }
}
