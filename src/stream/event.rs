use serde::Deserialize;
use serde_json::Value;

use crate::errors::{AppError, AppResult};
use crate::models::{ChatMessage, Memory};

/// Incremental fragment of the assistant response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delta {
    pub content: String,
    pub reasoning: Option<String>,
    pub role: Option<String>,
}

impl Delta {
    pub fn content(content: impl Into<String>) -> Self {
        Self { content: content.into(), ..Self::default() }
    }

    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        Self { reasoning: Some(reasoning.into()), ..Self::default() }
    }
}

/// Non-terminal out-of-band signal multiplexed into the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    WebSearchPerformed,
    ChatNameUpdated { name: String },
    MemoryAdded { memory: Memory },
    InferenceError { code: u16 },
}

/// One decoded stream event. `Done` is kept apart from the other controls
/// because it ends the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Delta(Delta),
    Control(ControlEvent),
    Done(ChatMessage),
}

#[derive(Deserialize)]
struct RawDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

/// Older backends send the memory as its bare content.
#[derive(Deserialize)]
#[serde(untagged)]
enum MemoryPayload {
    Full(Memory),
    Content(String),
}

impl From<MemoryPayload> for Memory {
    fn from(payload: MemoryPayload) -> Self {
        match payload {
            MemoryPayload::Full(memory) => memory,
            MemoryPayload::Content(content) => Memory { id: String::new(), content },
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "kind")]
enum ControlEnvelope {
    Done { message: ChatMessage },
    WebSearchPerformed,
    ChatNameUpdated { name: String },
    MemoryAdded { memory: MemoryPayload },
    InferenceError { code: u16 },
}

impl From<ControlEnvelope> for StreamFrame {
    fn from(envelope: ControlEnvelope) -> Self {
        match envelope {
            ControlEnvelope::Done { message } => StreamFrame::Done(message),
            ControlEnvelope::WebSearchPerformed => {
                StreamFrame::Control(ControlEvent::WebSearchPerformed)
            }
            ControlEnvelope::ChatNameUpdated { name } => {
                StreamFrame::Control(ControlEvent::ChatNameUpdated { name })
            }
            ControlEnvelope::MemoryAdded { memory } => {
                StreamFrame::Control(ControlEvent::MemoryAdded { memory: memory.into() })
            }
            ControlEnvelope::InferenceError { code } => {
                StreamFrame::Control(ControlEvent::InferenceError { code })
            }
        }
    }
}

/// Decodes the `data` payload of one server-sent event.
///
/// An event is a control event iff it has a non-null `control` field, whose
/// variant is picked by its `kind` tag. Otherwise it must carry `content` or
/// `reasoning` to be a delta.
pub fn decode_frame(data: &str) -> AppResult<StreamFrame> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| AppError::protocol(format!("event is not JSON: {e}")))?;
    let Value::Object(mut fields) = value else {
        return Err(AppError::protocol("event is not a JSON object"));
    };

    if let Some(control) = fields.remove("control").filter(|c| !c.is_null()) {
        let envelope: ControlEnvelope = serde_json::from_value(control)
            .map_err(|e| AppError::protocol(format!("unrecognised control event: {e}")))?;
        return Ok(envelope.into());
    }

    let raw: RawDelta = serde_json::from_value(Value::Object(fields))
        .map_err(|e| AppError::protocol(format!("malformed delta: {e}")))?;
    if raw.content.is_none() && raw.reasoning.is_none() {
        return Err(AppError::protocol("event carries neither a control nor a delta"));
    }

    Ok(StreamFrame::Delta(Delta {
        content: raw.content.unwrap_or_default(),
        reasoning: raw.reasoning,
        role: raw.role,
    }))
}
