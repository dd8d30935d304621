//! In-process stand-in for the chat backend, serving scripted SSE replies.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, Notify};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use chat_stream_client::ledger::StreamLedger;
use chat_stream_client::models::{
    Chat, ChatMessage, ContentPart, Memory, Model, ModelCatalog, Role,
};
use chat_stream_client::service::Services;
use chat_stream_client::state::SessionEvent;
use chat_stream_client::ClientConfig;

/// What one connection to a completion stream gets.
pub enum Step {
    /// Answer with a 500.
    Fail,
    /// Send these events, then close the connection.
    Events(Vec<Value>),
    /// Forward whatever the test pushes; the connection closes when the
    /// sender is dropped.
    Live(mpsc::UnboundedReceiver<Value>),
}

#[derive(Default)]
pub struct MockState {
    pub chats: Mutex<Vec<Chat>>,
    pub messages: Mutex<HashMap<String, Vec<ChatMessage>>>,
    pub memories: Mutex<Vec<Memory>>,
    pub models: Mutex<ModelCatalog>,
    /// Connection steps per stream id, consumed front to back.
    pub scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    /// Scripts handed to the streams created by the next posted messages.
    pub queued_replies: Mutex<VecDeque<Vec<Step>>>,
    pub stream_hits: Mutex<HashMap<String, u32>>,
    pub posted: Mutex<Vec<(String, Value)>>,
    pub deleted: Mutex<Vec<String>>,
    pub message_requests: AtomicUsize,
    /// When set, posting a message waits for a notification first.
    pub message_gate: Mutex<Option<Arc<Notify>>>,
}

pub struct MockBackend {
    pub uri: String,
    pub state: Arc<MockState>,
}

impl MockBackend {
    pub async fn start() -> Self {
        init_tracing();
        let state = Arc::new(MockState::default());
        *state.models.lock() = ModelCatalog { free: vec![model()], paid: Vec::new() };

        let app = Router::new()
            .route("/chats", get(list_chats).post(create_chat))
            .route("/chats/{id}", delete(delete_chat))
            .route("/chats/{id}/rename", post(rename_chat))
            .route("/chats/{id}/message", post(post_message))
            .route("/chats/{id}/messages", get(list_messages))
            .route("/models", get(list_models))
            .route("/memories", get(list_memories))
            .route("/memories/{id}", delete(delete_memory))
            .route("/completions/prompt/sse/{stream_id}", get(completion_stream))
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { uri: format!("http://{addr}"), state }
    }

    pub fn add_chat(&self, chat: Chat, messages: Vec<ChatMessage>) {
        self.state.messages.lock().insert(chat.id.clone(), messages);
        self.state.chats.lock().push(chat);
    }

    pub fn script(&self, stream_id: &str, steps: impl IntoIterator<Item = Step>) {
        self.state
            .scripts
            .lock()
            .insert(stream_id.to_string(), steps.into_iter().collect());
    }

    pub fn queue_reply(&self, steps: impl IntoIterator<Item = Step>) {
        self.state.queued_replies.lock().push_back(steps.into_iter().collect());
    }

    pub fn hits(&self, stream_id: &str) -> u32 {
        self.state.stream_hits.lock().get(stream_id).copied().unwrap_or(0)
    }

    pub fn posted_count(&self) -> usize {
        self.state.posted.lock().len()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("chat_stream_client=debug,tower_http=debug")
        .with_test_writer()
        .try_init();
}

/// Services wired to `backend`, with a short reconnect delay.
pub fn services(backend: &MockBackend, ledger: StreamLedger) -> Services {
    let config = ClientConfig {
        backend_uri: backend.uri.clone(),
        retry_delay: Duration::from_millis(10),
        ..ClientConfig::default()
    };
    Services::from_config(&config, ledger).unwrap()
}

pub fn model() -> Model {
    Model {
        identifier: "google/gemini-2.0-flash".into(),
        name: "Gemini".into(),
        author: "Google".into(),
        base_url: "https://openrouter.ai/api/v1".into(),
        is_reasoning: false,
    }
}

pub fn message(chat_id: &str, role: Role, text: &str) -> ChatMessage {
    ChatMessage {
        id: Uuid::new_v4().to_string(),
        chat_id: chat_id.to_string(),
        role,
        content: vec![ContentPart::text(text)],
        model: (role == Role::Assistant).then(|| "Gemini".to_string()),
        reasoning: None,
        timestamp: Utc::now(),
        updated_memory: None,
    }
}

pub fn delta(content: &str) -> Value {
    json!({ "content": content, "role": "assistant" })
}

pub fn control(control: Value) -> Value {
    json!({ "control": control })
}

pub fn done(chat_id: &str, text: &str) -> Value {
    control(json!({ "kind": "Done", "message": message(chat_id, Role::Assistant, text) }))
}

/// Waits for the first event matching `wanted`.
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("session events ended"),
            }
        }
    });
    found.await.expect("timed out waiting for a session event")
}

// ── Handlers ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WindowQuery {
    start: usize,
    take: usize,
}

async fn list_chats(
    Query(window): Query<WindowQuery>,
    State(state): State<Arc<MockState>>,
) -> Json<Vec<Chat>> {
    let chats = state.chats.lock();
    Json(chats.iter().skip(window.start).take(window.take).cloned().collect())
}

async fn create_chat(State(state): State<Arc<MockState>>) -> Json<Chat> {
    let chat = Chat::new(Uuid::new_v4().to_string());
    state.chats.lock().insert(0, chat.clone());
    state.messages.lock().insert(chat.id.clone(), Vec::new());
    Json(chat)
}

async fn delete_chat(Path(id): Path<String>, State(state): State<Arc<MockState>>) -> StatusCode {
    state.chats.lock().retain(|chat| chat.id != id);
    state.deleted.lock().push(id);
    StatusCode::NO_CONTENT
}

async fn rename_chat(
    Path(id): Path<String>,
    State(state): State<Arc<MockState>>,
    Json(name): Json<String>,
) -> StatusCode {
    let mut chats = state.chats.lock();
    match chats.iter_mut().find(|chat| chat.id == id) {
        Some(chat) => {
            chat.name = Some(name);
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn list_messages(
    Path(id): Path<String>,
    Query(window): Query<WindowQuery>,
    State(state): State<Arc<MockState>>,
) -> Response {
    let messages = state.messages.lock().get(&id).cloned();
    match messages {
        Some(messages) => {
            let page: Vec<ChatMessage> =
                messages.into_iter().skip(window.start).take(window.take).collect();
            Json(page).into_response()
        }
        None => (StatusCode::NOT_FOUND, "no such chat").into_response(),
    }
}

async fn post_message(
    Path(chat_id): Path<String>,
    State(state): State<Arc<MockState>>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    state.message_requests.fetch_add(1, Ordering::SeqCst);
    let gate = state.message_gate.lock().clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }

    let text = payload["message"].as_str().unwrap_or_default().to_string();
    state.posted.lock().push((chat_id.clone(), payload));

    let user_message = message(&chat_id, Role::User, &text);
    state
        .messages
        .lock()
        .entry(chat_id.clone())
        .or_default()
        .insert(0, user_message.clone());

    let stream_id = Uuid::new_v4().to_string();
    let steps = state
        .queued_replies
        .lock()
        .pop_front()
        .unwrap_or_else(|| vec![Step::Events(vec![delta("ok"), done(&chat_id, "ok")])]);
    state.scripts.lock().insert(stream_id.clone(), steps.into_iter().collect());

    Json(json!({ "stream_id": stream_id, "user_message": user_message }))
}

async fn list_models(State(state): State<Arc<MockState>>) -> Json<ModelCatalog> {
    Json(state.models.lock().clone())
}

async fn list_memories(State(state): State<Arc<MockState>>) -> Json<Vec<Memory>> {
    Json(state.memories.lock().clone())
}

async fn delete_memory(Path(id): Path<String>, State(state): State<Arc<MockState>>) -> StatusCode {
    state.memories.lock().retain(|memory| memory.id != id);
    StatusCode::NO_CONTENT
}

async fn completion_stream(
    Path(stream_id): Path<String>,
    State(state): State<Arc<MockState>>,
) -> Response {
    *state.stream_hits.lock().entry(stream_id.clone()).or_insert(0) += 1;
    let step = state
        .scripts
        .lock()
        .get_mut(&stream_id)
        .and_then(VecDeque::pop_front);

    let events: BoxStream<'static, Value> = match step {
        None | Some(Step::Fail) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Some(Step::Events(events)) => stream::iter(events).boxed(),
        Some(Step::Live(receiver)) => stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        })
        .boxed(),
    };

    Sse::new(events.map(|event| Ok::<_, Infallible>(Event::default().data(event.to_string()))))
        .into_response()
}
