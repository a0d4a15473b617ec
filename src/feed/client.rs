use futures::StreamExt;
use reqwest::redirect::Policy;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_feed, Feed};
use crate::config::Config;
use crate::util::validate_feed_url;

const MAX_RETRIES: u32 = 3;
const MAX_REDIRECTS: usize = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching and parsing a feed.
///
/// The sync engine treats every variant the same way: the source's fetch
/// failed and its watermark stays where it was.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, redirect policy, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request and body read exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Document could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// An entry has neither a published nor an updated timestamp
    #[error("Entry '{0}' has no published timestamp")]
    MissingTimestamp(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

fn network_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e)
    }
}

/// Redirect policy shared by feed and favicon requests.
///
/// - Limits redirects to 3 hops maximum
/// - Detects redirect loops (same URL appearing twice in chain)
/// - Refuses redirects to localhost or private addresses unless `allow_private`
pub fn redirect_policy(allow_private: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        if let Err(e) = validate_feed_url(url.as_str(), allow_private) {
            return attempt.error(format!("Redirect target rejected: {e}"));
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Build the `reqwest` client shared by the feed and favicon fetchers.
///
/// Connections are pooled per host; the configured timeout (if any) also
/// bounds each request at the transport level.
pub fn http_client(config: &Config) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .redirect(redirect_policy(config.allow_private_hosts))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60));
    if let Some(limit) = config.request_timeout() {
        builder = builder.timeout(limit);
    }
    Ok(builder.build()?)
}

/// Run one request, body read included, under an optional deadline.
pub(crate) async fn within<T>(
    limit: Option<Duration>,
    request: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, request)
            .await
            .map_err(|_| FetchError::Timeout)?,
        None => request.await,
    }
}

/// Fetches a feed document and parses it.
///
/// Implemented over HTTP by [`HttpFeedClient`]; the sync engine is generic
/// over this trait so it can run against canned feeds.
pub trait FeedClient {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Feed, FetchError>> + Send;
}

/// Outcome of a single HTTP attempt.
enum Attempt {
    /// 429 or 5xx: worth retrying after a backoff
    Retry(reqwest::StatusCode),
    Body { bytes: Vec<u8>, final_url: String },
}

/// [`FeedClient`] backed by `reqwest`.
///
/// Rate limiting (429) and server errors (5xx) are retried up to 3 times
/// with exponential backoff; 4xx responses fail immediately. The timeout
/// covers each attempt from sending the request to the last body byte.
#[derive(Debug, Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
    timeout: Option<Duration>,
    backoff: Duration,
}

impl HttpFeedClient {
    pub fn new(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self {
            client,
            timeout,
            backoff: Duration::from_secs(2),
        }
    }

    /// Use the configured request timeout. Build `client` with [`http_client`].
    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(client, config.request_timeout())
    }

    /// Base delay of the retry backoff (doubled on every attempt: 2s, 4s, 8s by default)
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, url: &str) -> Result<Attempt, FetchError> {
        let response = self.client.get(url).send().await.map_err(network_error)?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Ok(Attempt::Retry(status));
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let final_url = response.url().to_string();
        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        Ok(Attempt::Body { bytes, final_url })
    }

    fn delay(&self, retry_count: u32) -> Duration {
        self.backoff * 2u32.pow(retry_count)
    }
}

impl FeedClient for HttpFeedClient {
    async fn fetch(&self, url: &str) -> Result<Feed, FetchError> {
        let mut retry_count = 0;

        let (bytes, final_url) = loop {
            match within(self.timeout, self.attempt(url)).await {
                Ok(Attempt::Body { bytes, final_url }) => break (bytes, final_url),
                Ok(Attempt::Retry(status)) => {
                    if retry_count >= MAX_RETRIES {
                        return Err(if status.is_server_error() {
                            FetchError::HttpStatus(status.as_u16())
                        } else {
                            FetchError::RateLimited(MAX_RETRIES)
                        });
                    }

                    let delay = self.delay(retry_count);
                    tracing::warn!(
                        feed = %url,
                        status = %status,
                        retry = retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Feed request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(FetchError::IncompleteResponse { expected, received })
                    if retry_count < MAX_RETRIES =>
                {
                    let delay = self.delay(retry_count);
                    tracing::debug!(
                        feed = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let mut feed = parse_feed(&bytes)?;
        if feed.url.is_none() {
            feed.url = Some(final_url);
        }

        tracing::debug!(feed = %url, entries = feed.entries.len(), "Fetched feed");
        Ok(feed)
    }
}

/// Read a response body, failing past `limit` bytes or short of Content-Length.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(network_error)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
