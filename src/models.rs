use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Chat {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), name: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One part of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    Text { value: String },
    Image { id: String },
    Pdf { id: String },
}

impl ContentPart {
    pub fn text(value: impl Into<String>) -> Self {
        ContentPart::Text { value: value.into() }
    }
}

/// A finalized message. Only the pending message of a chat is ever mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub updated_memory: Option<String>,
}

impl ChatMessage {
    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { value } => Some(value.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// The in-flight assistant message of a streaming chat.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PendingMessage {
    pub model: String,
    pub content: String,
    pub reasoning: Option<String>,
    pub search: bool,
    pub memory: Option<String>,
}

impl PendingMessage {
    pub fn new(model: impl Into<String>, search: bool, memory: Option<String>) -> Self {
        Self {
            model: model.into(),
            content: String::new(),
            reasoning: None,
            search,
            memory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    pub base_url: String,
    #[serde(default)]
    pub is_reasoning: bool,
}

/// `GET /models` response, split in tiers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub free: Vec<Model>,
    #[serde(default)]
    pub paid: Vec<Model>,
}

impl ModelCatalog {
    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.free.iter().chain(self.paid.iter())
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Model> {
        self.iter().find(|m| m.name == name)
    }

    pub fn find_by_identifier(&self, identifier: &str) -> Option<&Model> {
        self.iter().find(|m| m.identifier == identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
}

/// Paging window for list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListWindow {
    pub start: usize,
    pub take: usize,
}

impl ListWindow {
    pub fn first(take: usize) -> Self {
        Self { start: 0, take }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    High,
    Medium,
    Low,
}

/// Body of `POST /chats/:id/message`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessagePayload {
    pub message: String,
    pub model: String,
    pub reasoning: Option<ReasoningEffort>,
    pub use_search: bool,
    pub use_memories: bool,
}

/// Response of `POST /chats/:id/message`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedMessage {
    pub stream_id: String,
    pub user_message: ChatMessage,
}

/// `{ "error": "..." }` body returned by failing endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_decodes_tagged_content() {
        let json = r#"{
            "id": "m1",
            "chat_id": "c1",
            "role": "Assistant",
            "content": [
                { "type": "Text", "value": "Hello " },
                { "type": "Image", "id": "img" },
                { "type": "Text", "value": "world" }
            ],
            "model": "Gemini",
            "reasoning": null,
            "timestamp": "2025-05-01T12:00:00Z"
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content[1], ContentPart::Image { id: "img".into() });
        assert_eq!(msg.text(), "Hello world");
        assert_eq!(msg.updated_memory, None);
    }

    #[test]
    fn send_payload_uses_lowercase_effort() {
        let payload = SendMessagePayload {
            message: "hi".into(),
            model: "m".into(),
            reasoning: Some(ReasoningEffort::High),
            use_search: true,
            use_memories: false,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["reasoning"], "high");
        assert_eq!(value["use_search"], true);

        let none = SendMessagePayload { reasoning: None, ..payload };
        assert!(serde_json::to_value(&none).unwrap()["reasoning"].is_null());
    }

    #[test]
    fn catalog_lookup_spans_both_tiers() {
        let model = |name: &str| Model {
            identifier: format!("vendor/{name}"),
            name: name.to_string(),
            author: "vendor".into(),
            base_url: "https://openrouter.ai/api/v1/chat/completions".into(),
            is_reasoning: false,
        };
        let catalog = ModelCatalog { free: vec![model("Free")], paid: vec![model("Paid")] };
        assert_eq!(catalog.find_by_name("Paid").unwrap().identifier, "vendor/Paid");
        assert!(catalog.find_by_identifier("vendor/Free").is_some());
        assert!(catalog.find_by_name("Missing").is_none());
    }
}
