//! Per-chat durable record of in-flight streams.
//!
//! Stream keys for a chat exist exactly while a stream is in flight for it.
//! Every delta and control event is written through before the next one is
//! handled, so a restart loses nothing that was already acknowledged.

pub mod store;

use std::sync::Arc;

use tracing::warn;

use crate::errors::{AppError, AppResult};
use crate::models::Memory;

pub use store::{InMemoryStore, JsonFileStore, KeyValueStore};

const SEARCH_MARKER: &str = "true";

fn stream_key(chat_id: &str) -> String {
    format!("stream-{chat_id}")
}

fn content_key(chat_id: &str) -> String {
    format!("streaming-message-{chat_id}")
}

fn reasoning_key(chat_id: &str) -> String {
    format!("streaming-message-reasoning-{chat_id}")
}

fn model_key(chat_id: &str) -> String {
    format!("streaming-message-{chat_id}-model")
}

fn search_key(chat_id: &str) -> String {
    format!("streaming-message-{chat_id}-search")
}

fn memory_key(chat_id: &str) -> String {
    format!("streaming-message-{chat_id}-memory")
}

fn last_model_key(chat_id: &str) -> String {
    format!("chat-model-{chat_id}")
}

/// Everything recorded for a chat with an in-flight stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub stream_id: String,
    pub content: String,
    /// `None` when no reasoning fragment was recorded.
    pub reasoning: Option<String>,
    pub model: Option<String>,
    pub search: bool,
    pub memory: Option<Memory>,
}

#[derive(Clone)]
pub struct StreamLedger {
    store: Arc<dyn KeyValueStore>,
}

impl StreamLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    /// Records a freshly started stream.
    pub fn begin(&self, chat_id: &str, stream_id: &str, model: &str, search: bool) -> AppResult<()> {
        self.store.remove_many(&[memory_key(chat_id), search_key(chat_id)])?;

        let mut pairs = vec![
            (stream_key(chat_id), stream_id.to_string()),
            (model_key(chat_id), model.to_string()),
            (content_key(chat_id), String::new()),
            (reasoning_key(chat_id), String::new()),
        ];
        if search {
            pairs.push((search_key(chat_id), SEARCH_MARKER.to_string()));
        }
        self.store.set_many(&pairs)
    }

    pub fn append_delta(&self, chat_id: &str, content: &str, reasoning: Option<&str>) -> AppResult<()> {
        let mut pairs = Vec::with_capacity(2);

        if !content.is_empty() {
            let key = content_key(chat_id);
            let mut accumulated = self.store.get(&key)?.unwrap_or_default();
            accumulated.push_str(content);
            pairs.push((key, accumulated));
        }
        if let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) {
            let key = reasoning_key(chat_id);
            let mut accumulated = self.store.get(&key)?.unwrap_or_default();
            accumulated.push_str(reasoning);
            pairs.push((key, accumulated));
        }

        if pairs.is_empty() {
            return Ok(());
        }
        self.store.set_many(&pairs)
    }

    pub fn finish_search(&self, chat_id: &str) -> AppResult<()> {
        self.store.remove(&search_key(chat_id))
    }

    pub fn record_memory(&self, chat_id: &str, memory: &Memory) -> AppResult<()> {
        let blob = serde_json::to_string(memory)
            .map_err(|e| AppError::decode("ledger memory", e))?;
        self.store.set(&memory_key(chat_id), &blob)
    }

    /// Reads back the stream recorded for `chat_id`, if any.
    pub fn load(&self, chat_id: &str) -> AppResult<Option<LedgerEntry>> {
        let Some(stream_id) = self.store.get(&stream_key(chat_id))? else {
            return Ok(None);
        };

        let memory = match self.store.get(&memory_key(chat_id))? {
            Some(blob) => match serde_json::from_str::<Memory>(&blob) {
                Ok(memory) => Some(memory),
                Err(e) => {
                    warn!("Dropping unreadable pending memory for chat {chat_id}: {e}");
                    None
                }
            },
            None => None,
        };

        Ok(Some(LedgerEntry {
            stream_id,
            content: self.store.get(&content_key(chat_id))?.unwrap_or_default(),
            reasoning: self
                .store
                .get(&reasoning_key(chat_id))?
                .filter(|r| !r.is_empty()),
            model: self.store.get(&model_key(chat_id))?,
            search: self.store.get(&search_key(chat_id))?.is_some(),
            memory,
        }))
    }

    /// Removes every stream key of the chat in one store call.
    pub fn clear(&self, chat_id: &str) -> AppResult<()> {
        self.store.remove_many(&[
            stream_key(chat_id),
            content_key(chat_id),
            reasoning_key(chat_id),
            model_key(chat_id),
            search_key(chat_id),
            memory_key(chat_id),
        ])
    }

    pub fn remember_model(&self, chat_id: &str, model: &str) -> AppResult<()> {
        self.store.set(&last_model_key(chat_id), model)
    }

    pub fn last_model(&self, chat_id: &str) -> AppResult<Option<String>> {
        self.store.get(&last_model_key(chat_id))
    }
}
