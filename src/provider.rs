//! Rate-limited market/news provider client
//!
//! Wraps the external data provider behind a process-wide token bucket and a
//! retry policy. The bucket is the only synchronization point contended
//! across agents, so token handout must be fair: tokio's Mutex wakes waiters
//! in FIFO order, and the bucket holds it across the refill wait.

use crate::config::ProviderConfig;
use crate::error::AssistantError;
use crate::models::{EarningsReport, NewsArticle, Quote};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Typed access to the provider's quote, earnings and news endpoints.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_news(&self, symbols: &[String], limit: usize) -> Result<Vec<NewsArticle>>;
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote>;
    async fn fetch_earnings(&self, symbol: &str) -> Result<Vec<EarningsReport>>;
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilling at the provider's configured rate. An exhausted
/// bucket suspends the caller up to `max_wait` instead of failing
/// immediately; beyond that bound the call is rejected.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
    max_wait: Duration,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32, max_wait: Duration) -> Self {
        let capacity = f64::from(requests_per_minute);
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity / 60.0,
            max_wait,
        }
    }

    /// Take one token, suspending until one refills if necessary.
    /// The lock is held across the wait so queued callers are served FIFO.
    pub async fn acquire(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let deficit = 1.0 - state.tokens;
        let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
        if wait > self.max_wait {
            return Err(AssistantError::RateLimitExceeded(format!(
                "token available in {:.1}s, wait bound is {:.1}s",
                wait.as_secs_f64(),
                self.max_wait.as_secs_f64()
            )));
        }

        tokio::time::sleep(wait).await;
        state.tokens = 0.0;
        state.last_refill = Instant::now();
        Ok(())
    }
}

/// HTTP client for the market/news provider with rate limiting, bounded
/// retries and a per-request deadline.
pub struct RateLimitedClient {
    client: Client,
    base_url: String,
    api_key: String,
    bucket: TokenBucket,
    retry_attempts: u32,
}

impl RateLimitedClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            bucket: TokenBucket::new(config.requests_per_minute, config.max_token_wait),
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    /// Raw provider call. Transient failures (5xx, 429, timeout) are retried
    /// with exponential backoff; other 4xx propagate immediately.
    pub async fn call(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut backoff = Duration::from_millis(250);

        for attempt in 1..=self.retry_attempts {
            self.bucket.acquire().await?;

            debug!(endpoint, attempt, "Provider request");

            let result = self
                .client
                .get(&url)
                .query(params)
                .query(&[("api_token", self.api_key.as_str())])
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| {
                            AssistantError::ProviderRequest(format!(
                                "invalid JSON from {}: {}",
                                endpoint, e
                            ))
                        });
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(endpoint, %status, attempt, "Transient provider failure");
                    } else {
                        return Err(AssistantError::ProviderRequest(format!(
                            "{} returned {}",
                            endpoint, status
                        )));
                    }
                }
                Err(e) if e.is_timeout() => {
                    warn!(endpoint, attempt, "Provider deadline exceeded");
                    if attempt == self.retry_attempts {
                        return Err(AssistantError::ProviderTimeout(format!(
                            "{} timed out after {} attempts",
                            endpoint, attempt
                        )));
                    }
                }
                Err(e) => {
                    return Err(AssistantError::ProviderRequest(format!(
                        "{} request failed: {}",
                        endpoint, e
                    )));
                }
            }

            if attempt < self.retry_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(AssistantError::ProviderRequest(format!(
            "{} failed after {} attempts",
            endpoint, self.retry_attempts
        )))
    }
}

#[derive(Debug, Deserialize)]
struct NewsEnvelope {
    #[serde(default)]
    data: Vec<NewsArticle>,
}

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    data: Quote,
}

#[derive(Debug, Deserialize)]
struct EarningsEnvelope {
    #[serde(default)]
    data: Vec<EarningsReport>,
}

#[async_trait]
impl MarketDataProvider for RateLimitedClient {
    async fn fetch_news(&self, symbols: &[String], limit: usize) -> Result<Vec<NewsArticle>> {
        let params = vec![
            ("symbols".to_string(), symbols.join(",")),
            ("limit".to_string(), limit.to_string()),
            ("language".to_string(), "en".to_string()),
        ];
        let raw = self.call("/v1/news/all", &params).await?;
        let envelope: NewsEnvelope = serde_json::from_value(raw).map_err(|e| {
            AssistantError::ProviderRequest(format!("unexpected news payload: {}", e))
        })?;
        Ok(envelope.data)
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let raw = self.call("/v1/quote", &params).await?;
        let envelope: QuoteEnvelope = serde_json::from_value(raw).map_err(|e| {
            AssistantError::ProviderRequest(format!("unexpected quote payload: {}", e))
        })?;
        Ok(envelope.data)
    }

    async fn fetch_earnings(&self, symbol: &str) -> Result<Vec<EarningsReport>> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let raw = self.call("/v1/earnings", &params).await?;
        let envelope: EarningsEnvelope = serde_json::from_value(raw).map_err(|e| {
            AssistantError::ProviderRequest(format!("unexpected earnings payload: {}", e))
        })?;
        Ok(envelope.data)
    }
}

/// Canned provider for development and testing. Keeps the pipeline runnable
/// without provider credentials.
pub struct StaticProvider {
    articles: Vec<NewsArticle>,
    fail: bool,
}

impl StaticProvider {
    pub fn new(articles: Vec<NewsArticle>) -> Self {
        Self {
            articles,
            fail: false,
        }
    }

    /// Provider that fails every call, simulating an upstream outage.
    pub fn failing() -> Self {
        Self {
            articles: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
    async fn fetch_news(&self, _symbols: &[String], limit: usize) -> Result<Vec<NewsArticle>> {
        if self.fail {
            return Err(AssistantError::ProviderRequest(
                "/v1/news/all returned 500 Internal Server Error".to_string(),
            ));
        }
        Ok(self.articles.iter().take(limit).cloned().collect())
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote> {
        if self.fail {
            return Err(AssistantError::ProviderRequest(
                "/v1/quote returned 500 Internal Server Error".to_string(),
            ));
        }
        Ok(Quote {
            symbol: symbol.to_string(),
            price: 150.50,
            change_percent: 2.5,
            date: "2025-01-02".to_string(),
        })
    }

    async fn fetch_earnings(&self, symbol: &str) -> Result<Vec<EarningsReport>> {
        if self.fail {
            return Err(AssistantError::ProviderRequest(
                "/v1/earnings returned 500 Internal Server Error".to_string(),
            ));
        }
        Ok(vec![EarningsReport {
            symbol: symbol.to_string(),
            actual_eps: 1.52,
            estimated_eps: 1.40,
            surprise_percent: 8.6,
            date: "2024-11-01".to_string(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bucket_suspends_when_exhausted() {
        // 60/minute refills one token per second.
        let bucket = TokenBucket::new(60, Duration::from_secs(120));

        // Drain the full capacity without waiting.
        for _ in 0..60 {
            bucket.acquire().await.unwrap();
        }

        let start = Instant::now();
        bucket.acquire().await.unwrap();
        bucket.acquire().await.unwrap();

        // Two more tokens need roughly two seconds of refill.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1900), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_rejects_waits_beyond_bound() {
        let bucket = TokenBucket::new(60, Duration::from_millis(100));

        for _ in 0..60 {
            bucket.acquire().await.unwrap();
        }

        // Next token is a full second away, which exceeds the 100ms bound.
        let err = bucket.acquire().await.unwrap_err();
        assert!(matches!(err, AssistantError::RateLimitExceeded(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_never_exceeds_configured_rate() {
        let bucket = TokenBucket::new(120, Duration::from_secs(600));

        let start = Instant::now();
        for _ in 0..240 {
            bucket.acquire().await.unwrap();
        }

        // 240 requests against a 120/min budget cannot complete in under a
        // minute no matter how they are scheduled.
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test]
    async fn test_static_provider_limits_articles() {
        let provider = StaticProvider::new(vec![
            NewsArticle {
                title: "Company X beats earnings estimates".to_string(),
                url: "https://example.com/a".to_string(),
                published_at: None,
                sentiment: Some("positive".to_string()),
            },
            NewsArticle {
                title: "Company X announces buyback".to_string(),
                url: "https://example.com/b".to_string(),
                published_at: None,
                sentiment: None,
            },
        ]);

        let articles = provider
            .fetch_news(&["X".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(articles.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_provider_surfaces_request_error() {
        let provider = StaticProvider::failing();
        let err = provider
            .fetch_news(&["X".to_string()], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::ProviderRequest(_)));
    }
}
