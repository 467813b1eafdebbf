use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    New,
    Refresh,
}

/// A targeted find/replace edit applied instead of a full rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgicalSnippet {
    pub find: String,
    pub replace: String,
}

/// Content produced by the generation step. Only the critic loop mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub title: String,
    pub slug: String,
    pub meta_description: String,
    pub html_body: String,
    #[serde(default)]
    pub structured_data_schema: Option<serde_json::Value>,
    pub is_full_rewrite: bool,
    #[serde(default)]
    pub surgical_snippets: Option<Vec<SurgicalSnippet>>,
}

/// One unit of publish work. Lives until its publish attempt resolves.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: String,
    pub kind: ContentKind,
    /// Public url of the page being refreshed.
    pub source_url: Option<String>,
    /// Raw public HTML of the source page, used for resource discovery.
    pub source_content: Option<String>,
    pub generated: Option<GeneratedContent>,
}

impl ContentItem {
    pub fn refresh(id: &str, source_url: Option<String>, source_content: String) -> Self {
        Self {
            id: id.to_string(),
            kind: ContentKind::Refresh,
            source_url,
            source_content: Some(source_content),
            generated: None,
        }
    }

    pub fn new_article() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: ContentKind::New,
            source_url: None,
            source_content: None,
            generated: None,
        }
    }
}
