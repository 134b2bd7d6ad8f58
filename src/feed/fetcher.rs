use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_MAX_BODY: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving a document.
///
/// Everything except `InvalidScheme`/`InvalidUrl` is transient: callers retry
/// a bounded number of times or skip until the next cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request (including body read) exceeded its timeout
    #[error("Request timed out")]
    Timeout,
    /// DNS, connect, TLS or protocol failure
    #[error("Connection failed: {0}")]
    Connection(#[source] reqwest::Error),
    /// Redirect chain exceeded the configured limit
    #[error("Too many redirects")]
    TooManyRedirects,
    /// URL uses a scheme other than http/https
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    InvalidScheme(String),
    /// URL could not be parsed, even with an `http://` prefix
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Body stream broke off before completion
    #[error("Failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// Returns true if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout
            | FetchError::Connection(_)
            | FetchError::TooManyRedirects
            | FetchError::Body(_)
            | FetchError::IncompleteResponse { .. } => true,
            FetchError::InvalidScheme(_)
            | FetchError::InvalidUrl(_)
            | FetchError::ResponseTooLarge => false,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_redirect() {
            FetchError::TooManyRedirects
        } else if err.is_body() || err.is_decode() {
            FetchError::Body(err)
        } else {
            FetchError::Connection(err)
        }
    }
}

/// Transport policy for a [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_redirects: usize,
    /// Accept self-signed or otherwise invalid TLS certificates.
    /// Off unless explicitly enabled in the configuration.
    pub accept_invalid_certs: bool,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            accept_invalid_certs: false,
            max_body_bytes: DEFAULT_MAX_BODY,
            user_agent: concat!("frontpage/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// A retrieved document. Non-success statuses are still delivered.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchedDocument {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP retrieval with per-request timeouts. Cheap to clone.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl Fetcher {
    pub fn new(policy: &FetchPolicy) -> Result<Self, FetchError> {
        if policy.accept_invalid_certs {
            tracing::warn!("TLS certificate verification disabled for feed and page fetches");
        }
        let client = reqwest::Client::builder()
            .user_agent(policy.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(policy.max_redirects))
            .danger_accept_invalid_certs(policy.accept_invalid_certs)
            .build()
            .map_err(FetchError::Connection)?;
        Ok(Self {
            client,
            max_body_bytes: policy.max_body_bytes,
        })
    }

    /// Retrieve `url`, spending at most `timeout` on the whole attempt
    /// (connect, headers and body).
    ///
    /// A URL without a scheme is fetched over `http://`. Non-2xx responses are
    /// logged and returned; the caller decides what to do with the body.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedDocument, FetchError> {
        let target = normalize_url(url)?;

        match tokio::time::timeout(timeout, self.fetch_inner(target, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    async fn fetch_inner(&self, target: Url, timeout: Duration) -> Result<FetchedDocument, FetchError> {
        let response = self
            .client
            .get(target.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            tracing::warn!(url = %final_url, status = status.as_u16(), "Non-success status, using body anyway");
        }

        let body = read_limited_bytes(response, self.max_body_bytes).await?;
        Ok(FetchedDocument {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }
}

/// Parse a user- or feed-supplied URL, adding `http://` when the scheme is missing.
pub fn normalize_url(raw: &str) -> Result<Url, FetchError> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        // "host:port/path" parses with "host" as the scheme
        Ok(_) if !raw.contains("://") => with_http_prefix(raw),
        Ok(url) => Err(FetchError::InvalidScheme(url.scheme().to_string())),
        Err(url::ParseError::RelativeUrlWithoutBase) => with_http_prefix(raw),
        Err(e) => Err(FetchError::InvalidUrl(e.to_string())),
    }
}

fn with_http_prefix(raw: &str) -> Result<Url, FetchError> {
    let prefixed = format!("http://{}", raw.trim_start_matches('/'));
    tracing::debug!(url = %raw, "URL has no scheme, retrying with http://");
    Url::parse(&prefixed).map_err(|e| FetchError::InvalidUrl(e.to_string()))
}

async fn read_limited_bytes(
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
        let chunk = chunk.map_err(FetchError::from_reqwest)?;
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
