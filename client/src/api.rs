use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::SyncError;
use crate::sync::entities::{Message, Room, RoomId};
use crate::sync::messages::MessageQuery;

/// Read access to the server's room directory.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// All rooms visible to this session.
    async fn list_rooms(&self) -> Result<Vec<Room>, SyncError>;
    /// One room by id; `Ok(None)` when the server doesn't know it.
    async fn get_room(&self, id: &str) -> Result<Option<Room>, SyncError>;
    /// Declared child ids of a space.
    async fn get_children(&self, space_id: &str) -> Result<Vec<RoomId>, SyncError>;
    /// Declared parent ids of a room.
    async fn get_parents(&self, room_id: &str) -> Result<Vec<RoomId>, SyncError>;
}

/// The message fetch endpoint.
#[async_trait]
pub trait MessageEndpoint: Send + Sync {
    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, SyncError>;
}

/// HTTP client for the instance REST API. Built lazily by the session
/// supervisor — one client per session generation, dropped wholesale when
/// the base URL or token changes.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            // The token never goes into logs or panic messages.
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Structured error body the server attaches to non-success responses.
#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    error_type: String,
}

impl ApiClient {
    pub fn new(base_url: &str, auth_token: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.map(|t| t.to_string()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.get(format!("{}{}", self.base_url, path));
        if let Some(token) = &self.auth_token {
            req = req.header("x-session-token", token);
        }
        req
    }

    /// Decode a JSON response, mapping the failure modes onto the error
    /// taxonomy: non-2xx with a structured body becomes [`SyncError::Server`],
    /// a success status with an empty/undecodable body is a
    /// [`SyncError::ProtocolViolation`].
    async fn expect_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, SyncError> {
        let status = resp.status();
        if !status.is_success() {
            let status_message = status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string();
            let error_type = resp
                .json::<ApiErrorBody>()
                .await
                .map(|b| b.error_type)
                .unwrap_or_else(|_| "Unknown".to_string());
            return Err(SyncError::Server {
                status_message,
                error_type,
            });
        }

        let bytes = resp.bytes().await.map_err(SyncError::transport)?;
        if bytes.is_empty() {
            return Err(SyncError::ProtocolViolation(
                "server returned an empty body".into(),
            ));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::ProtocolViolation(format!("undecodable body: {e}")))
    }
}

#[async_trait]
impl RoomDirectory for ApiClient {
    async fn list_rooms(&self) -> Result<Vec<Room>, SyncError> {
        let resp = self
            .get("/rooms")
            .send()
            .await
            .map_err(SyncError::transport)?;
        Self::expect_json(resp).await
    }

    async fn get_room(&self, id: &str) -> Result<Option<Room>, SyncError> {
        let resp = self
            .get(&format!("/rooms/{id}"))
            .send()
            .await
            .map_err(SyncError::transport)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::expect_json(resp).await.map(Some)
    }

    async fn get_children(&self, space_id: &str) -> Result<Vec<RoomId>, SyncError> {
        let resp = self
            .get(&format!("/rooms/{space_id}/children"))
            .send()
            .await
            .map_err(SyncError::transport)?;
        Self::expect_json(resp).await
    }

    async fn get_parents(&self, room_id: &str) -> Result<Vec<RoomId>, SyncError> {
        let resp = self
            .get(&format!("/rooms/{room_id}/parents"))
            .send()
            .await
            .map_err(SyncError::transport)?;
        Self::expect_json(resp).await
    }
}

#[async_trait]
impl MessageEndpoint for ApiClient {
    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, SyncError> {
        let mut req = self.get(&format!("/channels/{}/messages", query.channel_id));
        if let Some(limit) = query.limit {
            req = req.query(&[("limit", limit.to_string())]);
        }
        if let Some(before) = &query.before {
            req = req.query(&[("before", before)]);
        }
        if let Some(after) = &query.after {
            req = req.query(&[("after", after)]);
        }
        if let Some(sort) = query.sort {
            req = req.query(&[("sort", sort.as_str())]);
        }
        if let Some(nearby) = &query.nearby {
            req = req.query(&[("nearby", nearby)]);
        }
        if let Some(include_users) = query.include_users {
            req = req.query(&[("include_users", include_users.to_string())]);
        }

        debug!(channel_id = %query.channel_id, "fetching messages from network");
        let resp = req.send().await.map_err(SyncError::transport)?;
        Self::expect_json(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = ApiClient::new("https://api.example.chat/", None);
        assert_eq!(client.base_url(), "https://api.example.chat");
    }

    #[test]
    fn test_debug_output_redacts_token() {
        let client = ApiClient::new("https://api.example.chat", Some("secret-token"));
        let rendered = format!("{client:?}");
        assert!(rendered.contains("api.example.chat"));
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn test_error_body_decodes_type_field() {
        let body: ApiErrorBody = serde_json::from_str(r#"{"type":"Unauthorized"}"#).unwrap();
        assert_eq!(body.error_type, "Unauthorized");
    }
}
