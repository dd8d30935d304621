use super::{expect_success, read_json, ApiClient};
use crate::errors::AppResult;
use crate::models::{Memory, ModelCatalog};

impl ApiClient {
    /// `GET /models`
    pub async fn list_models(&self) -> AppResult<ModelCatalog> {
        let response = self.http.get(self.url("/models")).send().await?;
        read_json(response, "model catalog").await
    }

    /// `GET /memories`
    pub async fn list_memories(&self) -> AppResult<Vec<Memory>> {
        let response = self.http.get(self.url("/memories")).send().await?;
        read_json(response, "memories").await
    }

    /// `DELETE /memories/:id`
    pub async fn remove_memory(&self, id: &str) -> AppResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/memories/{id}")))
            .send()
            .await?;
        expect_success(response).await
    }
}
