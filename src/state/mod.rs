//! Client-side stores, shared between the orchestrator and stream tasks.

pub mod chats;
pub mod memory;
pub mod service;

use std::sync::Arc;

use parking_lot::Mutex;

pub use chats::{ChatRuntime, ChatSessionStore, ChatsListState, ListState, SessionEvent};
pub use memory::MemoryStore;
pub use service::{provider_key, ServiceStore};

pub type SharedSessionStore = Arc<Mutex<ChatSessionStore>>;
pub type SharedServiceStore = Arc<Mutex<ServiceStore>>;
pub type SharedMemoryStore = Arc<Mutex<MemoryStore>>;
