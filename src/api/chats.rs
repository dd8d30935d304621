use tracing::debug;

use super::{expect_success, read_json, ApiClient};
use crate::errors::AppResult;
use crate::models::{Chat, ListWindow};

impl ApiClient {
    /// `GET /chats?start&take`
    pub async fn list_chats(&self, window: ListWindow) -> AppResult<Vec<Chat>> {
        let response = self.http.get(self.url("/chats")).query(&window).send().await?;
        read_json(response, "chat list").await
    }

    /// `POST /chats`
    pub async fn create_chat(&self) -> AppResult<Chat> {
        let response = self.http.post(self.url("/chats")).send().await?;
        let chat: Chat = read_json(response, "created chat").await?;
        debug!("Created chat {}", chat.id);
        Ok(chat)
    }

    /// `DELETE /chats/:id`
    pub async fn delete_chat(&self, chat_id: &str) -> AppResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/chats/{chat_id}")))
            .send()
            .await?;
        expect_success(response).await
    }

    /// `POST /chats/:id/rename` with the new name as a JSON string.
    pub async fn rename_chat(&self, chat_id: &str, name: &str) -> AppResult<()> {
        let response = self
            .http
            .post(self.url(&format!("/chats/{chat_id}/rename")))
            .json(&name)
            .send()
            .await?;
        expect_success(response).await
    }
}
