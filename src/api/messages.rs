use serde::Deserialize;
use tracing::debug;

use super::{read_json, ApiClient};
use crate::errors::{AppError, AppResult};
use crate::models::{ChatMessage, CreatedMessage, ErrorBody, ListWindow, SendMessagePayload};

#[derive(Deserialize)]
#[serde(untagged)]
enum MessagesBody {
    Messages(Vec<ChatMessage>),
    Error(ErrorBody),
}

impl ApiClient {
    /// `GET /chats/:id/messages?start&take`, newest first.
    ///
    /// Failures come back as `AppError::Backend` carrying the message to show
    /// in place of the list.
    pub async fn fetch_chat_messages(
        &self,
        chat_id: &str,
        window: ListWindow,
    ) -> AppResult<Vec<ChatMessage>> {
        let response = self
            .http
            .get(self.url(&format!("/chats/{chat_id}/messages")))
            .query(&window)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        match (status.is_success(), serde_json::from_str::<MessagesBody>(&body)) {
            (_, Ok(MessagesBody::Error(ErrorBody { error }))) => {
                Err(AppError::Backend { message: error })
            }
            (true, Ok(MessagesBody::Messages(messages))) => Ok(messages),
            (true, Err(e)) => Err(AppError::decode("chat messages", e)),
            (false, _) => Err(AppError::Backend {
                message: "Invalid Chat ID.".to_string(),
            }),
        }
    }

    /// `POST /chats/:id/message`. Returns the stored user message and the id
    /// of the stream carrying the reply.
    pub async fn create_message(
        &self,
        chat_id: &str,
        payload: &SendMessagePayload,
    ) -> AppResult<CreatedMessage> {
        let response = self
            .http
            .post(self.url(&format!("/chats/{chat_id}/message")))
            .json(payload)
            .send()
            .await?;
        let created: CreatedMessage = read_json(response, "created message").await?;
        debug!("Chat {chat_id} got stream {}", created.stream_id);
        Ok(created)
    }
}
