//! Publisher / Post Resolver — maps a `ContentItem` to a remote post and
//! performs create-or-update.
//!
//! Refresh items must resolve to an existing post: discovery from the source
//! HTML, then the generated slug, then the slug of the source url. When all
//! three miss, the publish aborts with `PostNotFound`; a refresh never creates.
//! New items check their slug once and turn into an update when it exists.

pub mod discovery;
pub mod media;
pub mod wp;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::content::{ContentItem, ContentKind, GeneratedContent};
use crate::models::page::slug_from_url;
use crate::net::{NetError, TextSource};
use crate::progress::ProgressFeed;
use discovery::discover_post_id;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("No existing post found for {0}")]
    PostNotFound(String),

    #[error("Backend rejected the request ({status}): {message}")]
    BackendError { status: u16, message: String },

    #[error(transparent)]
    Net(#[from] NetError),

    #[error("Unexpected backend response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePost {
    pub id: u64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: u64,
    pub source_url: String,
}

/// Outgoing post body. `None` fields are left untouched by the backend.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PostPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured_media: Option<u64>,
}

/// Content backend. Page fetches come from `TextSource`.
#[async_trait]
pub trait Backend: TextSource {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<RemotePost>, PublishError>;
    async fn create_post(&self, payload: &PostPayload) -> Result<RemotePost, PublishError>;
    async fn update_post(&self, id: u64, payload: &PostPayload) -> Result<RemotePost, PublishError>;
    async fn upload_media(
        &self,
        filename: &str,
        mime: &str,
        data: Bytes,
    ) -> Result<MediaItem, PublishError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Resolution
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Discovered,
    GeneratedSlug,
    UrlSlug,
    NewSlugExists,
    Created,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub post_id: u64,
    pub link: String,
    pub created: bool,
    pub resolution: Resolution,
    pub media_uploaded: usize,
}

const NEW_POST_STATUS: &str = "draft";

pub struct Publisher {
    backend: Arc<dyn Backend>,
    progress: Arc<ProgressFeed>,
}

impl Publisher {
    pub fn new(backend: Arc<dyn Backend>, progress: Arc<ProgressFeed>) -> Self {
        Self { backend, progress }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub async fn publish(&self, item: &ContentItem) -> Result<PublishOutcome, PublishError> {
        let label = item.source_url.as_deref().unwrap_or(&item.id);
        let generated = item
            .generated
            .as_ref()
            .ok_or_else(|| PublishError::Decode(format!("{label}: nothing generated to publish")))?;

        let existing = match item.kind {
            ContentKind::Refresh => Some(self.resolve_existing(item, generated).await?),
            ContentKind::New => self.resolve_new(generated).await?,
        };

        let inlined =
            media::upload_inline_images(self.backend.as_ref(), &generated.html_body, &self.progress, Some(label))
                .await;
        let content = with_structured_data(&inlined.html, generated.structured_data_schema.as_ref());
        let title = usable_title(&generated.title, item.source_url.as_deref());
        if title.is_none() {
            debug!(page = %label, "Title looks like a url, left unchanged");
        }
        let excerpt = Some(generated.meta_description.clone()).filter(|m| !m.trim().is_empty());

        let (post, created, resolution) = match existing {
            Some((id, resolution)) => {
                let payload = PostPayload {
                    title,
                    content,
                    excerpt,
                    ..Default::default()
                };
                (self.backend.update_post(id, &payload).await?, false, resolution)
            }
            None => {
                let payload = PostPayload {
                    title,
                    slug: Some(generated.slug.clone()).filter(|s| !s.is_empty()),
                    content,
                    excerpt,
                    status: Some(NEW_POST_STATUS.to_string()),
                    featured_media: inlined.first_media_id,
                };
                (self.backend.create_post(&payload).await?, true, Resolution::Created)
            }
        };

        info!(page = %label, post_id = post.id, created, "Published");
        self.progress.info(
            Some(label),
            format!(
                "{} post {} ({})",
                if created { "Created" } else { "Updated" },
                post.id,
                resolution_label(resolution)
            ),
        );
        Ok(PublishOutcome {
            post_id: post.id,
            link: post.link,
            created,
            resolution,
            media_uploaded: inlined.uploaded,
        })
    }

    async fn resolve_existing(
        &self,
        item: &ContentItem,
        generated: &GeneratedContent,
    ) -> Result<(u64, Resolution), PublishError> {
        let label = item.source_url.clone().unwrap_or_else(|| item.id.clone());

        let source_html = match (&item.source_content, &item.source_url) {
            (Some(html), _) if !html.trim().is_empty() => Some(html.clone()),
            (_, Some(url)) => match self.backend.fetch_text(url).await {
                Ok(html) => Some(html),
                Err(e) => {
                    debug!(page = %label, error = %e, "Source page unavailable for discovery");
                    None
                }
            },
            _ => None,
        };
        if let Some(found) = source_html.as_deref().and_then(discover_post_id) {
            debug!(page = %label, post_id = found.post_id, source = ?found.source, "Post id discovered");
            return Ok((found.post_id, Resolution::Discovered));
        }

        if !generated.slug.trim().is_empty() {
            if let Some(post) = self.backend.find_by_slug(generated.slug.trim()).await? {
                return Ok((post.id, Resolution::GeneratedSlug));
            }
        }

        let url_slug = item.source_url.as_deref().and_then(slug_from_url);
        if let Some(slug) = url_slug.filter(|s| s != generated.slug.trim()) {
            if let Some(post) = self.backend.find_by_slug(&slug).await? {
                return Ok((post.id, Resolution::UrlSlug));
            }
        }

        Err(PublishError::PostNotFound(label))
    }

    async fn resolve_new(
        &self,
        generated: &GeneratedContent,
    ) -> Result<Option<(u64, Resolution)>, PublishError> {
        if generated.slug.trim().is_empty() {
            return Ok(None);
        }
        Ok(self
            .backend
            .find_by_slug(generated.slug.trim())
            .await?
            .map(|post| (post.id, Resolution::NewSlugExists)))
    }
}

fn resolution_label(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Discovered => "discovered from page",
        Resolution::GeneratedSlug => "matched generated slug",
        Resolution::UrlSlug => "matched url slug",
        Resolution::NewSlugExists => "slug already existed",
        Resolution::Created => "new",
    }
}

/// `None` when the draft title is a url placeholder.
fn usable_title(title: &str, source_url: Option<&str>) -> Option<String> {
    let title = title.trim();
    let is_url = title.starts_with("http://")
        || title.starts_with("https://")
        || source_url.map(|u| u.trim() == title).unwrap_or(false);
    if title.is_empty() || is_url {
        None
    } else {
        Some(title.to_string())
    }
}

/// Appends the JSON-LD block unless the body already carries one.
fn with_structured_data(html: &str, schema: Option<&serde_json::Value>) -> String {
    match schema {
        Some(schema) if !schema.is_null() && !html.contains("application/ld+json") => format!(
            "{html}\n<script type=\"application/ld+json\">{}</script>",
            schema
        ),
        _ => html.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::FakeBackend;
    use super::*;

    fn generated(title: &str, slug: &str, body: &str) -> GeneratedContent {
        GeneratedContent {
            title: title.to_string(),
            slug: slug.to_string(),
            meta_description: "Updated buying guide.".to_string(),
            html_body: body.to_string(),
            structured_data_schema: None,
            is_full_rewrite: true,
            surgical_snippets: None,
        }
    }

    fn refresh(url: &str, source: &str, gen: GeneratedContent) -> ContentItem {
        let mut item = ContentItem::refresh(url, Some(url.to_string()), source.to_string());
        item.generated = Some(gen);
        item
    }

    fn publisher(backend: Arc<FakeBackend>) -> Publisher {
        Publisher::new(backend, Arc::new(ProgressFeed::new()))
    }

    #[tokio::test]
    async fn test_discovered_id_skips_slug_search() {
        let backend = Arc::new(FakeBackend::default().with_post("best-tents", 5));
        let source = r#"<html><head><link rel="shortlink" href="https://site.test/?p=77"></head><body></body></html>"#;
        let item = refresh("https://site.test/best-tents/", source, generated("Best Tents", "best-tents", "<p>x</p>"));

        let outcome = publisher(backend.clone()).publish(&item).await.unwrap();

        assert_eq!(outcome.post_id, 77);
        assert_eq!(outcome.resolution, Resolution::Discovered);
        assert_eq!(backend.calls(), vec!["update:77".to_string()]);
    }

    #[tokio::test]
    async fn test_falls_back_to_generated_then_url_slug() {
        let backend = Arc::new(FakeBackend::default().with_post("old-tents", 9));
        let item = refresh(
            "https://site.test/guides/old-tents/",
            "<html><body></body></html>",
            generated("Best Tents", "best-tents", "<p>x</p>"),
        );

        let outcome = publisher(backend.clone()).publish(&item).await.unwrap();

        assert_eq!(outcome.post_id, 9);
        assert_eq!(outcome.resolution, Resolution::UrlSlug);
        assert_eq!(
            backend.calls(),
            vec!["find:best-tents", "find:old-tents", "update:9"]
        );
    }

    #[tokio::test]
    async fn test_refresh_never_creates() {
        let backend = Arc::new(FakeBackend::default());
        let item = refresh(
            "https://site.test/gone/",
            "<html><body></body></html>",
            generated("Gone", "gone", "<p>x</p>"),
        );

        let err = publisher(backend.clone()).publish(&item).await.unwrap_err();

        assert!(matches!(err, PublishError::PostNotFound(ref u) if u == "https://site.test/gone/"));
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn test_new_item_with_existing_slug_updates() {
        let backend = Arc::new(FakeBackend::default().with_post("tent-guide", 12));
        let mut item = ContentItem::new_article();
        item.generated = Some(generated("Tent Guide", "tent-guide", "<p>x</p>"));

        let outcome = publisher(backend.clone()).publish(&item).await.unwrap();

        assert!(!outcome.created);
        assert_eq!(outcome.post_id, 12);
        assert_eq!(backend.calls(), vec!["find:tent-guide", "update:12"]);
    }

    #[tokio::test]
    async fn test_new_item_creates_with_featured_media() {
        let backend = Arc::new(FakeBackend::default());
        let mut item = ContentItem::new_article();
        let mut gen = generated(
            "Tent Guide",
            "tent-guide",
            r#"<p>x</p><img src="data:image/png;base64,aGVsbG8=">"#,
        );
        gen.structured_data_schema = Some(serde_json::json!({"@type": "Article"}));
        item.generated = Some(gen);

        let outcome = publisher(backend.clone()).publish(&item).await.unwrap();

        assert!(outcome.created);
        let payload = backend.payloads.lock().unwrap()[0].clone();
        assert_eq!(payload.featured_media, Some(1));
        assert_eq!(payload.slug.as_deref(), Some("tent-guide"));
        assert_eq!(payload.status.as_deref(), Some("draft"));
        assert!(payload.content.contains("https://site.test/uploads/inline-1-"));
        assert!(payload.content.contains(r#"<script type="application/ld+json">{"@type":"Article"}</script>"#));
    }

    #[tokio::test]
    async fn test_url_title_is_omitted_on_update() {
        let backend = Arc::new(FakeBackend::default());
        let source = r#"<html><body class="postid-3"></body></html>"#;
        let item = refresh(
            "https://site.test/a/",
            source,
            generated("https://site.test/a/", "a", "<p>x</p>"),
        );

        publisher(backend.clone()).publish(&item).await.unwrap();

        let payload = backend.payloads.lock().unwrap()[0].clone();
        assert_eq!(payload.title, None);
        assert_eq!(payload.slug, None);
        assert_eq!(payload.featured_media, None);
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("title").is_none());
    }

    #[tokio::test]
    async fn test_backend_message_surfaces() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_writes("Sorry, you are not allowed to edit this post.");
        let source = r#"<html><body class="postid-3"></body></html>"#;
        let item = refresh("https://site.test/a/", source, generated("A title", "a", "<p>x</p>"));

        let err = publisher(backend).publish(&item).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Backend rejected the request (500): Sorry, you are not allowed to edit this post."
        );
    }
}
