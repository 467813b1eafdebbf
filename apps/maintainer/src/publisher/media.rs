//! Inline base64 images → hosted media.
//!
//! Each `data:image/...;base64,...` source is decoded and uploaded on its own.
//! A failed upload leaves that image untouched and is reported; the rest
//! still go through.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::Backend;
use crate::progress::ProgressFeed;

static DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"data:(image/[a-zA-Z0-9.+-]+);base64,([A-Za-z0-9+/=\s]+)"#).expect("data uri regex")
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlinedMedia {
    pub html: String,
    pub uploaded: usize,
    pub failed: usize,
    /// Id of the first successful upload.
    pub first_media_id: Option<u64>,
}

pub async fn upload_inline_images(
    backend: &dyn Backend,
    html: &str,
    progress: &ProgressFeed,
    page: Option<&str>,
) -> InlinedMedia {
    let mut out = InlinedMedia {
        html: html.to_string(),
        ..Default::default()
    };

    let found: Vec<(String, String, String)> = DATA_URI
        .captures_iter(html)
        .filter_map(|cap| {
            Some((
                cap.get(0)?.as_str().to_string(),
                cap.get(1)?.as_str().to_lowercase(),
                cap.get(2)?.as_str().to_string(),
            ))
        })
        .collect();

    for (index, (uri, mime, payload)) in found.into_iter().enumerate() {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        let data = match STANDARD.decode(compact.as_bytes()) {
            Ok(data) => data,
            Err(e) => {
                out.failed += 1;
                progress.warn(page, format!("Inline image {} is not valid base64: {e}", index + 1));
                continue;
            }
        };
        let filename = media_filename(index, &mime, &data);
        match backend.upload_media(&filename, &mime, Bytes::from(data)).await {
            Ok(media) => {
                out.html = out.html.replacen(&uri, &media.source_url, 1);
                out.uploaded += 1;
                out.first_media_id.get_or_insert(media.id);
                progress.info(page, format!("Uploaded inline image as {}", media.source_url));
            }
            Err(e) => {
                out.failed += 1;
                progress.warn(page, format!("Inline image upload failed: {e}"));
            }
        }
    }

    out
}

/// `inline-<n>-<hash8>.<ext>`; the hash keeps retried uploads recognisable.
fn media_filename(index: usize, mime: &str, data: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(data));
    let ext = match mime.trim_start_matches("image/") {
        "jpeg" | "jpg" | "pjpeg" => "jpg",
        "svg+xml" => "svg",
        other => other,
    };
    format!("inline-{}-{}.{ext}", index + 1, &digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::fakes::FakeBackend;

    #[tokio::test]
    async fn test_uploads_and_rewrites_sources() {
        let backend = FakeBackend::default();
        let progress = ProgressFeed::new();
        let html = r#"<p>a</p><img src="data:image/png;base64,aGVsbG8="><img src="data:image/jpeg;base64,d29ybGQ=">"#;

        let out = upload_inline_images(&backend, html, &progress, None).await;

        assert_eq!(out.uploaded, 2);
        assert_eq!(out.first_media_id, Some(1));
        assert!(!out.html.contains("data:image"));
        assert!(out.html.contains(r#"src="https://site.test/uploads/inline-1-"#));
        assert!(out.html.contains(".jpg\""));
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_image_in_place() {
        let backend = FakeBackend::default();
        backend.fail_uploads();
        let progress = ProgressFeed::new();
        let html = r#"<img src="data:image/png;base64,aGVsbG8=">"#;

        let out = upload_inline_images(&backend, html, &progress, Some("/a")).await;

        assert_eq!(out.html, html);
        assert_eq!((out.uploaded, out.failed), (0, 1));
        assert_eq!(out.first_media_id, None);
        assert_eq!(progress.recent(1)[0].page.as_deref(), Some("/a"));
    }

    #[test]
    fn test_media_filename_uses_extension_and_hash() {
        let name = media_filename(0, "image/svg+xml", b"<svg/>");
        assert!(name.starts_with("inline-1-"));
        assert!(name.ends_with(".svg"));
        assert_eq!(name.len(), "inline-1-".len() + 8 + ".svg".len());
    }
}
