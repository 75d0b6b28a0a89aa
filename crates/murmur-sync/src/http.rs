//! HTTP implementation of [`SyncApi`] using reqwest.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use murmur_core::{CommentId, RoomId, UniqueId};

use crate::api::{Direction, Result, SyncApi};
use crate::error::SyncError;

const LOAD_COMMENTS_PATH: &str = "api/v2/mobile/load_comments";
const SYNC_PATH: &str = "api/v2/mobile/sync";
const DELETE_PATH: &str = "api/v2/mobile/delete_messages";

/// REST client for the chat server's comment endpoints.
#[derive(Debug, Clone)]
pub struct HttpSyncApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpSyncApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    /// Use a preconfigured reqwest client (timeouts, proxies, TLS).
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            client,
            base_url,
            token: token.into(),
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "api request");

        let response = self
            .client
            .request(method, &url)
            .query(&[("token", self.token.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        extract_comments(body)
    }
}

/// Pull the comment list out of a `{"results": {"comments": [...]}}` envelope.
pub fn extract_comments(mut body: Value) -> Result<Vec<Value>> {
    match body.pointer_mut("/results/comments").map(Value::take) {
        Some(Value::Array(comments)) => Ok(comments),
        Some(other) => Err(SyncError::MalformedResponse(format!(
            "results.comments is not an array: {other}"
        ))),
        None => Err(SyncError::MalformedResponse(
            "missing results.comments".into(),
        )),
    }
}

#[async_trait]
impl SyncApi for HttpSyncApi {
    async fn load_comments(
        &self,
        room_id: RoomId,
        last_comment_id: CommentId,
        direction: Direction,
    ) -> Result<Vec<Value>> {
        self.request(
            Method::GET,
            LOAD_COMMENTS_PATH,
            &[
                ("topic_id", room_id.to_string()),
                ("last_comment_id", last_comment_id.to_string()),
                ("after", (direction == Direction::After).to_string()),
            ],
        )
        .await
    }

    async fn sync(&self, last_received_comment_id: CommentId) -> Result<Vec<Value>> {
        self.request(
            Method::GET,
            SYNC_PATH,
            &[(
                "last_received_comment_id",
                last_received_comment_id.to_string(),
            )],
        )
        .await
    }

    async fn delete_comments(&self, unique_ids: &[UniqueId], hard: bool) -> Result<Vec<Value>> {
        let mut query: Vec<(&str, String)> = unique_ids
            .iter()
            .map(|id| ("unique_ids[]", id.to_string()))
            .collect();
        query.push(("is_delete_for_everyone", "true".to_string()));
        query.push(("is_hard_delete", hard.to_string()));

        self.request(Method::DELETE, DELETE_PATH, &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_comments() {
        let body = json!({"status": 200, "results": {"comments": [{"id": 1}, {"id": 2}]}});
        let comments = extract_comments(body).unwrap();
        assert_eq!(comments.len(), 2);
    }

    #[test]
    fn test_extract_comments_rejects_bad_envelope() {
        assert!(matches!(
            extract_comments(json!({"results": {}})),
            Err(SyncError::MalformedResponse(_))
        ));
        assert!(matches!(
            extract_comments(json!({"results": {"comments": "nope"}})),
            Err(SyncError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_base_url_normalized() {
        let api = HttpSyncApi::new("https://chat.example.com", "tok");
        assert_eq!(api.base_url, "https://chat.example.com/");
    }
}
