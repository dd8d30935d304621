use crate::models::Memory;

/// Memories the assistant has recorded about the user.
#[derive(Debug, Default)]
pub struct MemoryStore {
    memories: Option<Vec<Memory>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the list was fetched or a memory was added.
    pub fn memories(&self) -> Option<&[Memory]> {
        self.memories.as_deref()
    }

    pub fn set_memories(&mut self, memories: Vec<Memory>) {
        self.memories = Some(memories);
    }

    pub fn add_memory(&mut self, memory: Memory) {
        self.memories.get_or_insert_with(Vec::new).push(memory);
    }

    pub fn remove_memory(&mut self, id: &str) {
        if let Some(memories) = self.memories.as_mut() {
            memories.retain(|m| m.id != id);
        }
    }
}
