//! WordPress REST client: posts lookup/create/update and media upload.
//!
//! Every call goes through the shared `HttpFetcher`, so it is timeout-bounded,
//! falls back to the proxy once and waits for the backend cooldown gate.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use reqwest::{header, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{Backend, MediaItem, PostPayload, PublishError, RemotePost};
use crate::net::{HttpFetcher, NetError, TextSource};

#[derive(Debug, Deserialize)]
struct WpErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub struct WpClient {
    base_url: String,
    auth_header: String,
    fetcher: Arc<HttpFetcher>,
}

impl WpClient {
    /// `base_url` is the REST root, e.g. `https://site/wp-json/wp/v2`.
    pub fn new(base_url: &str, username: &str, app_password: &str, fetcher: Arc<HttpFetcher>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: basic_auth(username, app_password),
            fetcher,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// `Basic base64(user:password)`. Application passwords are pasted with
/// spaces, which WordPress ignores, so they are kept as given.
pub fn basic_auth(username: &str, app_password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{app_password}")))
}

/// Non-2xx → `BackendError` carrying the backend's `message` field.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, PublishError> {
    let status = response.status();
    let url = response.url().to_string();
    let body = response.text().await.map_err(|e| {
        PublishError::Net(NetError::FetchFailed {
            url: url.clone(),
            reason: e.to_string(),
        })
    })?;

    if !status.is_success() {
        let message = match serde_json::from_str::<WpErrorBody>(&body) {
            Ok(err) if !err.message.is_empty() => {
                debug!(code = %err.code, "Backend error body");
                err.message
            }
            _ => body.chars().take(200).collect(),
        };
        return Err(PublishError::BackendError {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| PublishError::Decode(format!("{url}: {e}")))
}

#[async_trait]
impl Backend for WpClient {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<RemotePost>, PublishError> {
        let url = self.endpoint("posts");
        let response = self
            .fetcher
            .send(&url, |client| {
                client
                    .get(&url)
                    .query(&[("slug", slug), ("status", "any")])
                    .header(header::AUTHORIZATION, &self.auth_header)
            })
            .await?;
        let posts: Vec<RemotePost> = decode(response).await?;
        Ok(posts.into_iter().next())
    }

    async fn create_post(&self, payload: &PostPayload) -> Result<RemotePost, PublishError> {
        let url = self.endpoint("posts");
        let response = self
            .fetcher
            .send(&url, |client| {
                client
                    .post(&url)
                    .header(header::AUTHORIZATION, &self.auth_header)
                    .json(payload)
            })
            .await?;
        decode(response).await
    }

    async fn update_post(&self, id: u64, payload: &PostPayload) -> Result<RemotePost, PublishError> {
        let url = self.endpoint(&format!("posts/{id}"));
        let response = self
            .fetcher
            .send(&url, |client| {
                client
                    .put(&url)
                    .header(header::AUTHORIZATION, &self.auth_header)
                    .json(payload)
            })
            .await?;
        decode(response).await
    }

    async fn upload_media(
        &self,
        filename: &str,
        mime: &str,
        data: Bytes,
    ) -> Result<MediaItem, PublishError> {
        let url = self.endpoint("media");
        let disposition = format!("attachment; filename=\"{filename}\"");
        let response = self
            .fetcher
            .send(&url, |client| {
                client
                    .post(&url)
                    .header(header::AUTHORIZATION, &self.auth_header)
                    .header(header::CONTENT_TYPE, mime)
                    .header(header::CONTENT_DISPOSITION, &disposition)
                    .body(data.clone())
            })
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl TextSource for WpClient {
    async fn fetch_text(&self, url: &str) -> Result<String, NetError> {
        self.fetcher.get_text(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(basic_auth("editor", "abcd efgh"), "Basic ZWRpdG9yOmFiY2QgZWZnaA==");
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let fetcher = Arc::new(HttpFetcher::new(std::time::Duration::from_secs(5), None, None).unwrap());
        let client = WpClient::new("https://site.test/wp-json/wp/v2/", "u", "p", fetcher);
        assert_eq!(client.endpoint("/posts/7"), "https://site.test/wp-json/wp/v2/posts/7");
    }
}
