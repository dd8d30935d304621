use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::models::{Chat, ChatMessage, PendingMessage};
use crate::stream::Delta;

const EVENT_CAPACITY: usize = 256;

/// Message-list fetch state of one chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListState {
    Idle,
    Loading,
    Success,
    Error(String),
}

/// Fetch state of the chat list itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatsListState {
    Loading,
    Loaded,
}

/// Runtime state of one chat.
#[derive(Debug, Clone)]
pub struct ChatRuntime {
    pub chat: Chat,
    pub list_state: ListState,
    /// Newest first.
    pub messages: Vec<ChatMessage>,
    pub pending: Option<PendingMessage>,
    pub searching: bool,
}

impl ChatRuntime {
    fn new(chat: Chat, messages: Option<Vec<ChatMessage>>) -> Self {
        let (list_state, messages) = match messages {
            Some(messages) => (ListState::Success, messages),
            None => (ListState::Idle, Vec::new()),
        };
        Self { chat, list_state, messages, pending: None, searching: false }
    }

    pub fn streaming(&self) -> bool {
        self.pending.is_some()
    }
}

/// Change notifications published by [`ChatSessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ChatInitialized { chat_id: String },
    ChatDeleted { chat_id: String },
    ChatRenamed { chat_id: String, name: String },
    ChatsLoaded,
    ChatsListFailed { error: String },
    ChatMoved { chat_id: String },
    ActiveChatChanged { chat_id: Option<String> },
    ListStateChanged { chat_id: String, state: ListState },
    MessagesChanged { chat_id: String },
    PendingStarted { chat_id: String },
    PendingUpdated { chat_id: String, content: String, reasoning: Option<String> },
    PendingMemoryUpdated { chat_id: String },
    PendingCleared { chat_id: String },
    SearchFinished { chat_id: String },
}

/// In-memory store of chats, their messages and their pending message.
///
/// At most one pending message exists per chat; `streaming` is true exactly
/// while it exists.
#[derive(Debug)]
pub struct ChatSessionStore {
    chats: HashMap<String, ChatRuntime>,
    order: Vec<String>,
    list_state: ChatsListState,
    list_error: Option<String>,
    active_chat: Option<String>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for ChatSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSessionStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            chats: HashMap::new(),
            order: Vec::new(),
            list_state: ChatsListState::Loading,
            list_error: None,
            active_chat: None,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn runtime_mut(&mut self, chat_id: &str) -> AppResult<&mut ChatRuntime> {
        self.chats
            .get_mut(chat_id)
            .ok_or_else(|| AppError::chat_not_found(chat_id))
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Chats in display order.
    pub fn chats(&self) -> impl Iterator<Item = &ChatRuntime> {
        self.order.iter().filter_map(|id| self.chats.get(id))
    }

    pub fn chat(&self, chat_id: &str) -> Option<&ChatRuntime> {
        self.chats.get(chat_id)
    }

    pub fn messages(&self, chat_id: &str) -> Option<&[ChatMessage]> {
        self.chats.get(chat_id).map(|c| c.messages.as_slice())
    }

    pub fn pending(&self, chat_id: &str) -> Option<&PendingMessage> {
        self.chats.get(chat_id).and_then(|c| c.pending.as_ref())
    }

    pub fn is_streaming(&self, chat_id: &str) -> bool {
        self.chats.get(chat_id).is_some_and(ChatRuntime::streaming)
    }

    pub fn is_searching(&self, chat_id: &str) -> bool {
        self.chats.get(chat_id).is_some_and(|c| c.searching)
    }

    pub fn list_state(&self) -> ChatsListState {
        self.list_state
    }

    pub fn list_error(&self) -> Option<&str> {
        self.list_error.as_deref()
    }

    pub fn active_chat(&self) -> Option<&str> {
        self.active_chat.as_deref()
    }

    // ── Chat list ────────────────────────────────────────────────────────────

    /// Inserts or overwrites a chat. With `messages` the chat is immediately
    /// `Success`, otherwise `Idle`. A pending message already held for the
    /// chat survives the overwrite.
    pub fn initialize_chat(&mut self, chat: Chat, messages: Option<Vec<ChatMessage>>) {
        let chat_id = chat.id.clone();
        let mut runtime = ChatRuntime::new(chat, messages);

        match self.chats.remove(&chat_id) {
            Some(previous) => {
                runtime.pending = previous.pending;
                runtime.searching = previous.searching;
            }
            None => self.order.push(chat_id.clone()),
        }
        self.chats.insert(chat_id.clone(), runtime);
        self.publish(SessionEvent::ChatInitialized { chat_id });
    }

    /// Moves a chat to the top of the display order.
    pub fn bring_to_front(&mut self, chat_id: &str) {
        if let Some(pos) = self.order.iter().position(|id| id == chat_id) {
            let id = self.order.remove(pos);
            self.order.insert(0, id);
            self.publish(SessionEvent::ChatMoved { chat_id: chat_id.to_string() });
        }
    }

    pub fn finish_fetching_chats(&mut self) {
        self.list_state = ChatsListState::Loaded;
        self.publish(SessionEvent::ChatsLoaded);
    }

    pub fn set_chats_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.list_error = Some(error.clone());
        self.publish(SessionEvent::ChatsListFailed { error });
    }

    pub fn set_active_chat(&mut self, chat_id: Option<String>) {
        self.active_chat = chat_id.clone();
        self.publish(SessionEvent::ActiveChatChanged { chat_id });
    }

    /// Removes a chat unless it is streaming. Returns whether it was removed.
    pub fn delete_chat(&mut self, chat_id: &str) -> bool {
        if self.is_streaming(chat_id) {
            warn!("Refusing to delete chat {chat_id} while it is streaming");
            return false;
        }
        if self.chats.remove(chat_id).is_none() {
            return false;
        }
        self.order.retain(|id| id != chat_id);
        if self.active_chat.as_deref() == Some(chat_id) {
            self.active_chat = None;
        }
        self.publish(SessionEvent::ChatDeleted { chat_id: chat_id.to_string() });
        true
    }

    pub fn rename_chat(&mut self, chat_id: &str, name: impl Into<String>) -> AppResult<()> {
        let name = name.into();
        self.runtime_mut(chat_id)?.chat.name = Some(name.clone());
        self.publish(SessionEvent::ChatRenamed { chat_id: chat_id.to_string(), name });
        Ok(())
    }

    /// Applies a name inferred by the model mid-stream.
    pub fn update_chat_name(&mut self, chat_id: &str, name: impl Into<String>) -> AppResult<()> {
        self.rename_chat(chat_id, name)
    }

    // ── Message lists ────────────────────────────────────────────────────────

    /// `Idle`/`Error` → `Loading`. Returns false when a fetch is running or
    /// the messages are already loaded.
    pub fn begin_fetch(&mut self, chat_id: &str) -> AppResult<bool> {
        let runtime = self.runtime_mut(chat_id)?;
        match runtime.list_state {
            ListState::Idle | ListState::Error(_) => {
                runtime.list_state = ListState::Loading;
            }
            ListState::Loading | ListState::Success => return Ok(false),
        }
        self.publish(SessionEvent::ListStateChanged {
            chat_id: chat_id.to_string(),
            state: ListState::Loading,
        });
        Ok(true)
    }

    /// `Loading` → `Success` or `Error(reason)`. Results arriving in any other
    /// state are dropped.
    pub fn finish_fetch(
        &mut self,
        chat_id: &str,
        result: Result<Vec<ChatMessage>, String>,
    ) -> AppResult<()> {
        let runtime = self.runtime_mut(chat_id)?;
        if runtime.list_state != ListState::Loading {
            debug!("Ignoring message list for chat {chat_id}: not loading");
            return Ok(());
        }
        let state = match result {
            Ok(messages) => {
                runtime.messages = messages;
                ListState::Success
            }
            Err(reason) => ListState::Error(reason),
        };
        runtime.list_state = state.clone();
        self.publish(SessionEvent::ListStateChanged { chat_id: chat_id.to_string(), state });
        self.publish(SessionEvent::MessagesChanged { chat_id: chat_id.to_string() });
        Ok(())
    }

    pub fn set_chat_messages(&mut self, chat_id: &str, messages: Vec<ChatMessage>) -> AppResult<()> {
        let runtime = self.runtime_mut(chat_id)?;
        runtime.messages = messages;
        runtime.list_state = ListState::Success;
        self.publish(SessionEvent::MessagesChanged { chat_id: chat_id.to_string() });
        Ok(())
    }

    /// Splices a page of older messages behind the ones already loaded.
    /// Messages already present are skipped, so a repeated page is a no-op.
    pub fn prepend_chat_messages(&mut self, chat_id: &str, older: Vec<ChatMessage>) -> AppResult<()> {
        let runtime = self.runtime_mut(chat_id)?;
        let fresh: Vec<ChatMessage> = older
            .into_iter()
            .filter(|m| !runtime.messages.iter().any(|known| known.id == m.id))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        runtime.messages.extend(fresh);
        self.publish(SessionEvent::MessagesChanged { chat_id: chat_id.to_string() });
        Ok(())
    }

    /// Inserts new messages at the front (newest first).
    pub fn add_chat_messages(&mut self, chat_id: &str, messages: Vec<ChatMessage>) -> AppResult<()> {
        let runtime = self.runtime_mut(chat_id)?;
        let mut merged = messages;
        merged.append(&mut runtime.messages);
        runtime.messages = merged;
        self.publish(SessionEvent::MessagesChanged { chat_id: chat_id.to_string() });
        Ok(())
    }

    // ── Pending message ──────────────────────────────────────────────────────

    pub fn init_pending_message(
        &mut self,
        chat_id: &str,
        model: impl Into<String>,
        search: bool,
        memory: Option<String>,
    ) -> AppResult<()> {
        let runtime = self.runtime_mut(chat_id)?;
        if runtime.pending.is_some() {
            return Err(AppError::PendingMessageExists { chat_id: chat_id.to_string() });
        }
        runtime.pending = Some(PendingMessage::new(model, search, memory));
        runtime.searching = search;
        self.publish(SessionEvent::PendingStarted { chat_id: chat_id.to_string() });
        Ok(())
    }

    /// Appends a delta. A missing reasoning fragment leaves the accumulated
    /// reasoning untouched.
    pub fn update_pending_message(&mut self, chat_id: &str, delta: &Delta) -> AppResult<()> {
        let runtime = self.runtime_mut(chat_id)?;
        let pending = runtime
            .pending
            .as_mut()
            .ok_or_else(|| AppError::NoPendingMessage { chat_id: chat_id.to_string() })?;

        pending.content.push_str(&delta.content);
        if let Some(fragment) = &delta.reasoning {
            pending.reasoning.get_or_insert_with(String::new).push_str(fragment);
        }

        self.publish(SessionEvent::PendingUpdated {
            chat_id: chat_id.to_string(),
            content: delta.content.clone(),
            reasoning: delta.reasoning.clone(),
        });
        Ok(())
    }

    pub fn update_pending_message_memory(
        &mut self,
        chat_id: &str,
        memory: impl Into<String>,
    ) -> AppResult<()> {
        let runtime = self.runtime_mut(chat_id)?;
        let pending = runtime
            .pending
            .as_mut()
            .ok_or_else(|| AppError::NoPendingMessage { chat_id: chat_id.to_string() })?;
        pending.memory = Some(memory.into());
        self.publish(SessionEvent::PendingMemoryUpdated { chat_id: chat_id.to_string() });
        Ok(())
    }

    /// Drops the pending message, returning it. Clearing a chat with no
    /// pending message is a no-op.
    pub fn clear_pending_message(&mut self, chat_id: &str) -> AppResult<Option<PendingMessage>> {
        let runtime = self.runtime_mut(chat_id)?;
        let pending = runtime.pending.take();
        runtime.searching = false;
        if pending.is_some() {
            self.publish(SessionEvent::PendingCleared { chat_id: chat_id.to_string() });
        }
        Ok(pending)
    }

    pub fn finish_web_search(&mut self, chat_id: &str) -> AppResult<()> {
        self.runtime_mut(chat_id)?.searching = false;
        self.publish(SessionEvent::SearchFinished { chat_id: chat_id.to_string() });
        Ok(())
    }
}
