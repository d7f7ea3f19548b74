use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MAX_PAGE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a regional page.
///
/// Any of these skips the region for the current run; its published feed is
/// left untouched and the next scheduled run tries again.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The page URL for a slug could not be built
    #[error("Invalid page URL for region {slug:?}: {source}")]
    InvalidUrl {
        slug: String,
        #[source]
        source: url::ParseError,
    },
}

/// Bounded retry with exponential backoff: `base_delay * 2^attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Retrieves raw regional advisory pages.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Fetcher {
    /// `base_url` is the regional forecast index; a slug is appended to it to
    /// form the page URL. A trailing `/` is added when missing.
    pub fn new(client: reqwest::Client, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// URL of one region's advisory page.
    pub fn page_url(&self, region_slug: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(region_slug)
            .map_err(|source| FetchError::InvalidUrl {
                slug: region_slug.to_string(),
                source,
            })
    }

    /// Fetches a region's page.
    ///
    /// # Behavior
    ///
    /// - Each attempt, headers and body together, is bounded by the
    ///   configured timeout
    /// - 429 and 5xx responses and truncated bodies are retried with
    ///   exponential backoff, up to `max_retries` times
    /// - Other non-2xx statuses fail immediately
    /// - Bodies are limited to 10MB
    pub async fn fetch(&self, region_slug: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.page_url(region_slug)?;
        let mut retry_count = 0;

        loop {
            let deadline = tokio::time::Instant::now() + self.timeout;
            let response = tokio::time::timeout_at(deadline, self.client.get(url.clone()).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(network_error)?;

            // EDGE-004: Handle rate limiting with exponential backoff
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= self.retry.max_retries {
                    return Err(FetchError::RateLimited(self.retry.max_retries));
                }
                let delay = self.retry.delay(retry_count);
                tracing::warn!(
                    region = %region_slug,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if response.status().is_server_error() {
                if retry_count >= self.retry.max_retries {
                    return Err(FetchError::HttpStatus(response.status().as_u16()));
                }
                let delay = self.retry.delay(retry_count);
                tracing::warn!(
                    region = %region_slug,
                    status = %response.status(),
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // EDGE-002: 4xx errors fail immediately
            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }

            let body = tokio::time::timeout_at(deadline, read_limited_bytes(response, MAX_PAGE_SIZE))
                .await
                .map_err(|_| FetchError::Timeout)?;
            match body {
                Ok(bytes) => {
                    tracing::debug!(region = %region_slug, bytes = bytes.len(), "Fetched page");
                    return Ok(bytes);
                }
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    // EDGE-005: Retry incomplete downloads with backoff
                    if retry_count >= self.retry.max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }
                    let delay = self.retry.delay(retry_count);
                    tracing::debug!(
                        region = %region_slug,
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
        }
    }
}

fn network_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
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

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html><body><div id="rainfalls"><div>Rainfall Advisory No. 1</div></div></body></html>"#;

    fn fetcher(server: &MockServer) -> Fetcher {
        let base = Url::parse(&format!("{}/regional-forecast", server.uri())).unwrap();
        Fetcher::new(reqwest::Client::new(), base).with_retry(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/regional-forecast/visprsd"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&mock_server)
            .await;

        let bytes = fetcher(&mock_server).fetch("visprsd").await.unwrap();
        assert_eq!(bytes, PAGE.as_bytes());
    }

    #[test]
    fn test_page_url_appends_slug() {
        let base = Url::parse("https://www.pagasa.dost.gov.ph/regional-forecast").unwrap();
        let fetcher = Fetcher::new(reqwest::Client::new(), base);
        assert_eq!(
            fetcher.page_url("visprsd").unwrap().as_str(),
            "https://www.pagasa.dost.gov.ph/regional-forecast/visprsd"
        );
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher(&mock_server).fetch("visprsd").await;
        match result {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        let result = fetcher(&mock_server).fetch("visprsd").await;
        match result {
            Err(FetchError::HttpStatus(500)) => {}
            other => panic!("Expected HttpStatus(500), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_503_retry_then_success() {
        use wiremock::matchers::any;

        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&mock_server)
            .await;

        let bytes = fetcher(&mock_server).fetch("visprsd").await.unwrap();
        assert_eq!(bytes, PAGE.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_rate_limited() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(4)
            .mount(&mock_server)
            .await;

        let result = fetcher(&mock_server).fetch("visprsd").await;
        assert!(matches!(result, Err(FetchError::RateLimited(3))));
    }

    #[tokio::test]
    async fn test_fetch_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; MAX_PAGE_SIZE + 1]))
            .mount(&mock_server)
            .await;

        let result = fetcher(&mock_server).fetch("visprsd").await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let result = fetcher(&mock_server)
            .with_timeout(Duration::from_millis(50))
            .fetch("visprsd")
            .await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_fetch_timeout_covers_stalled_body() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Headers arrive at once, then the body stalls after a few bytes
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n<html>")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let base = Url::parse(&format!("http://{addr}/regional-forecast/")).unwrap();
        let result = Fetcher::new(reqwest::Client::new(), base)
            .with_timeout(Duration::from_millis(200))
            .with_retry(RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            })
            .fetch("visprsd")
            .await;

        assert!(matches!(result, Err(FetchError::Timeout)));
        server.abort();
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }
}
