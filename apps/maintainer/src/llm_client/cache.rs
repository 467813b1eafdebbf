//! Fingerprint cache over any `Generator`.
//!
//! Fingerprint = hex(SHA-256(key ‖ 0x1f ‖ args joined by 0x1f ‖ 0x1f ‖ format)).
//! Only successful, non-empty results are cached. Entries expire after `ttl`
//! and the least recently used entry is evicted once `capacity` is reached.
//! The ttl stays below the ledger's short failure window, so a page retried
//! after a failed publish always gets a fresh generation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::llm_client::prompts::{OutputFormat, PromptKey};
use crate::llm_client::{GenerationError, Generator};

const SEPARATOR: [u8; 1] = [0x1f];

pub fn fingerprint(key: PromptKey, args: &[String], format: OutputFormat) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    for arg in args {
        hasher.update(SEPARATOR);
        hasher.update(arg.as_bytes());
    }
    hasher.update(SEPARATOR);
    hasher.update(format!("{format:?}").as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl: Duration::from_secs(10 * 60),
        }
    }
}

struct Entry {
    text: String,
    stored_at: Instant,
    last_used: u64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<String, Entry>,
    tick: u64,
}

pub struct CachedGenerator {
    inner: Arc<dyn Generator>,
    policy: CachePolicy,
    entries: Mutex<Entries>,
}

impl CachedGenerator {
    pub fn new(inner: Arc<dyn Generator>, policy: CachePolicy) -> Self {
        Self {
            inner,
            policy,
            entries: Mutex::new(Entries::default()),
        }
    }

    async fn lookup(&self, fp: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        entries.tick += 1;
        let tick = entries.tick;
        let expired = match entries.map.get_mut(fp) {
            Some(entry) if entry.stored_at.elapsed() < self.policy.ttl => {
                entry.last_used = tick;
                return Some(entry.text.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.map.remove(fp);
        }
        None
    }

    async fn store(&self, fp: String, text: String) {
        if self.policy.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().await;
        let ttl = self.policy.ttl;
        entries.map.retain(|_, e| e.stored_at.elapsed() < ttl);
        while entries.map.len() >= self.policy.capacity && !entries.map.contains_key(&fp) {
            let oldest = entries
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.map.remove(&key);
                }
                None => break,
            }
        }
        entries.tick += 1;
        let last_used = entries.tick;
        entries.map.insert(
            fp,
            Entry {
                text,
                stored_at: Instant::now(),
                last_used,
            },
        );
    }
}

#[async_trait]
impl Generator for CachedGenerator {
    async fn generate(
        &self,
        key: PromptKey,
        args: &[String],
        format: OutputFormat,
    ) -> Result<String, GenerationError> {
        let fp = fingerprint(key, args, format);
        if let Some(hit) = self.lookup(&fp).await {
            debug!(key = key.as_str(), "Generation cache hit");
            return Ok(hit);
        }

        let text = self.inner.generate(key, args, format).await?;
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        self.store(fp, text.clone()).await;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        reply: &'static str,
    }

    #[async_trait]
    impl Generator for Counting {
        async fn generate(
            &self,
            _key: PromptKey,
            _args: &[String],
            _format: OutputFormat,
        ) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    #[test]
    fn test_fingerprint_separates_arguments() {
        let a = fingerprint(
            PromptKey::SectionFaq,
            &["ab".to_string(), "c".to_string()],
            OutputFormat::Html,
        );
        let b = fingerprint(
            PromptKey::SectionFaq,
            &["a".to_string(), "bc".to_string()],
            OutputFormat::Html,
        );
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_repeat_requests_hit_cache() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            reply: "<p>ok</p>",
        });
        let cached = CachedGenerator::new(inner.clone(), CachePolicy::default());
        let args = vec!["Title".to_string(), "ctx".to_string()];
        for _ in 0..3 {
            let out = cached
                .generate(PromptKey::SectionFaq, &args, OutputFormat::Html)
                .await
                .unwrap();
            assert_eq!(out, "<p>ok</p>");
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_results_are_not_cached() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            reply: "  ",
        });
        let cached = CachedGenerator::new(inner.clone(), CachePolicy::default());
        let args = vec!["x".to_string()];
        for _ in 0..2 {
            let err = cached
                .generate(PromptKey::CriticGrade, &args, OutputFormat::Json)
                .await
                .unwrap_err();
            assert!(matches!(err, GenerationError::EmptyResponse));
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_reaches_inner_again() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            reply: "<p>ok</p>",
        });
        let cached = CachedGenerator::new(
            inner.clone(),
            CachePolicy {
                capacity: 8,
                ttl: Duration::from_secs(60),
            },
        );
        let args = vec!["Title".to_string()];

        cached.generate(PromptKey::RefreshArticle, &args, OutputFormat::Json).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        cached.generate(PromptKey::RefreshArticle, &args, OutputFormat::Json).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        cached.generate(PromptKey::RefreshArticle, &args, OutputFormat::Json).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            reply: "<p>ok</p>",
        });
        let cached = CachedGenerator::new(
            inner.clone(),
            CachePolicy {
                capacity: 2,
                ttl: Duration::from_secs(600),
            },
        );
        async fn faq(cached: &CachedGenerator, title: &str) {
            cached
                .generate(PromptKey::SectionFaq, &[title.to_string()], OutputFormat::Html)
                .await
                .unwrap();
        }

        faq(&cached, "a").await;
        faq(&cached, "b").await;
        faq(&cached, "a").await; // a is now more recent than b
        faq(&cached, "c").await; // evicts b
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);

        faq(&cached, "a").await;
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        faq(&cached, "b").await;
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
        assert!(cached.entries.lock().await.map.len() <= 2);
    }
}
