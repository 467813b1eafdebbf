//! Timeout-bounded HTTP with direct → proxy fallback.
//!
//! Transport failures (connect errors, timeouts) on the direct client are
//! retried once through the proxy when one is configured. HTTP status codes
//! are returned to the caller untouched.

pub mod gate;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use gate::CooldownGate;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Request to {url} timed out after {timeout_secs}s")]
    FetchTimeout { url: String, timeout_secs: u64 },

    #[error("Request to {url} failed: {reason}")]
    FetchFailed { url: String, reason: String },
}

/// Anything that can GET a url as text. Implemented by `HttpFetcher` and by
/// in-memory fakes in tests.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, NetError>;
}

const USER_AGENT: &str = "Mozilla/5.0 (compatible; ContentMaintainer/0.1)";

pub struct HttpFetcher {
    direct: Client,
    proxied: Option<Client>,
    timeout: Duration,
    gate: Option<Arc<CooldownGate>>,
}

impl HttpFetcher {
    pub fn new(
        timeout: Duration,
        proxy_url: Option<&str>,
        gate: Option<Arc<CooldownGate>>,
    ) -> anyhow::Result<Self> {
        // Direct means direct: ignore proxies from the environment.
        let direct = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .no_proxy()
            .build()?;
        let proxied = match proxy_url {
            Some(proxy) => Some(
                Client::builder()
                    .timeout(timeout)
                    .user_agent(USER_AGENT)
                    .proxy(reqwest::Proxy::all(proxy)?)
                    .build()?,
            ),
            None => None,
        };
        Ok(Self {
            direct,
            proxied,
            timeout,
            gate,
        })
    }

    /// Sends a request built by `build`, first directly, then once via the proxy.
    ///
    /// `build` is called once per attempt so the request can be rebuilt for the
    /// fallback client.
    pub async fn send<F>(&self, url: &str, build: F) -> Result<Response, NetError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        match self.attempt(url, &self.direct, &build).await {
            Ok(response) => Ok(response),
            Err(err) => match &self.proxied {
                Some(proxy) => {
                    warn!(url, error = %err, "Direct request failed, retrying via proxy");
                    self.attempt(url, proxy, &build).await
                }
                None => Err(err),
            },
        }
    }

    /// GET returning the body text. Non-2xx statuses become `FetchFailed`.
    pub async fn get_text(&self, url: &str) -> Result<String, NetError> {
        let response = self.send(url, |client| client.get(url)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetError::FetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }
        response.text().await.map_err(|e| self.classify(url, e))
    }

    async fn attempt<F>(&self, url: &str, client: &Client, build: &F) -> Result<Response, NetError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        if let Some(gate) = &self.gate {
            gate.wait().await;
        }
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, build(client).send()).await;
        let elapsed = started.elapsed();
        if let Some(gate) = &self.gate {
            gate.report(elapsed).await;
        }
        debug!(url, elapsed_ms = elapsed.as_millis() as u64, "HTTP call finished");

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(self.classify(url, e)),
            Err(_) => Err(NetError::FetchTimeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> NetError {
        if err.is_timeout() {
            NetError::FetchTimeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            NetError::FetchFailed {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl TextSource for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, NetError> {
        self.get_text(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate::GatePolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const OK_BODY: &str = "HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\nproxied";
    const UNAVAILABLE: &str =
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    async fn read_head(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Answers every connection with `response`; counts connections.
    async fn serve(response: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                read_head(&mut stream).await;
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (addr, hits)
    }

    /// Accepts connections and never answers.
    async fn black_hole() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr
    }

    /// A local address with nothing listening on it.
    async fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_connect_failure_retries_once_via_proxy() {
        let (proxy, proxy_hits) = serve(OK_BODY).await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5), Some(&proxy), None).unwrap();
        let url = format!("{}/page", closed_port().await);

        let body = fetcher.get_text(&url).await.unwrap();

        assert_eq!(body, "proxied");
        assert_eq!(proxy_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried() {
        let (origin, origin_hits) = serve(UNAVAILABLE).await;
        let (proxy, proxy_hits) = serve(OK_BODY).await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5), Some(&proxy), None).unwrap();

        let err = fetcher.get_text(&format!("{origin}/page")).await.unwrap_err();

        match err {
            NetError::FetchFailed { reason, .. } => assert!(reason.contains("503")),
            other => panic!("expected FetchFailed, got {other:?}"),
        }
        assert_eq!(origin_hits.load(Ordering::SeqCst), 1);
        assert_eq!(proxy_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let fetcher = HttpFetcher::new(Duration::from_millis(200), None, None).unwrap();
        let url = format!("{}/page", black_hole().await);

        let result = tokio::time::timeout(Duration::from_secs(5), fetcher.get_text(&url))
            .await
            .expect("fetch must not hang");

        assert!(matches!(result, Err(NetError::FetchTimeout { .. })));
    }

    #[tokio::test]
    async fn test_both_attempts_report_to_gate() {
        let gate = Arc::new(CooldownGate::new(GatePolicy {
            base: Duration::from_millis(1),
            step: Duration::from_millis(1),
            max: Duration::from_secs(1),
            slow_threshold: Duration::ZERO,
        }));
        let (proxy, _) = serve(OK_BODY).await;
        let fetcher =
            HttpFetcher::new(Duration::from_secs(5), Some(&proxy), Some(gate.clone())).unwrap();
        let url = format!("{}/page", closed_port().await);

        fetcher.get_text(&url).await.unwrap();

        assert_eq!(gate.current_cooldown().await, Duration::from_millis(3));
    }
}
