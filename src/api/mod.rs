//! HTTP client for the chat backend.

mod chats;
mod messages;
mod service;

use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::errors::{AppError, AppResult};
use crate::models::ErrorBody;
use crate::stream::CompletionStreamClient;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_uri: String,
}

impl ApiClient {
    /// Builds a client for `base_uri`. The session cookie, when given, is
    /// sent with every request.
    pub fn new(base_uri: impl Into<String>, session_cookie: Option<&str>) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|_| AppError::Config("session cookie is not a valid header value".into()))?;
            headers.insert(COOKIE, value);
        }
        let http = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self::from_parts(http, base_uri))
    }

    pub fn from_parts(http: reqwest::Client, base_uri: impl Into<String>) -> Self {
        let base_uri = base_uri.into().trim_end_matches('/').to_string();
        Self { http, base_uri }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// URL of the event stream carrying the reply for `stream_id`.
    pub fn stream_url(&self, stream_id: &str) -> String {
        self.url(&format!("/completions/prompt/sse/{stream_id}"))
    }

    /// A stream client sharing this client's connection pool and headers.
    pub fn stream_client(&self) -> CompletionStreamClient {
        CompletionStreamClient::new(self.http.clone(), self.base_uri.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_uri)
    }
}

/// Maps a failing response body to an error, preferring the backend's
/// `{ "error": ... }` message.
fn error_from_body(status: StatusCode, body: &str) -> AppError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) => AppError::Backend { message: error },
        Err(_) => AppError::BackendStatus {
            status: status.as_u16(),
            message: if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                body.trim().to_string()
            },
        },
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, what: &'static str) -> AppResult<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(error_from_body(status, &body));
    }
    serde_json::from_str(&body).map_err(|e| AppError::decode(what, e))
}

async fn expect_success(response: Response) -> AppResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &body))
}
