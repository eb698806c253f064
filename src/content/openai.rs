use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const MAX_RESPONSE_SIZE: usize = 2 * 1024 * 1024; // 2MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid UTF-8 in response")]
    InvalidUtf8,
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
    #[error("Unexpected completion response: {0}")]
    InvalidResponse(String),
    #[error("Completion contained no message content")]
    EmptyCompletion,
}

impl ContentError {
    /// Returns true if this error is transient and the request should be retried.
    fn is_retryable(&self) -> bool {
        match self {
            ContentError::Timeout(_) | ContentError::Network(_) => true,
            ContentError::HttpStatus(status) => *status >= 500 || *status == 429,
            ContentError::ResponseTooLarge(_)
            | ContentError::InvalidUtf8
            | ContentError::InvalidBaseUrl(_)
            | ContentError::InsecureBaseUrl
            | ContentError::InvalidResponse(_)
            | ContentError::EmptyCompletion => false,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug)]
pub struct CompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl CompletionClient {
    /// Creates a client for `base_url` (e.g. `https://api.openai.com/v1`).
    ///
    /// HTTPS is required so the API key never travels in clear text; plain
    /// HTTP is accepted only for `localhost`/`127.0.0.1`.
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: SecretString,
        model: impl Into<String>,
    ) -> Result<Self, ContentError> {
        let parsed =
            url::Url::parse(base_url).map_err(|e| ContentError::InvalidBaseUrl(e.to_string()))?;

        // SEC-002: Bearer key only over HTTPS; plain HTTP is limited to loopback test servers
        match parsed.scheme() {
            "https" => {}
            "http" if matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1")) => {
                tracing::warn!(base_url = %base_url, "Using non-HTTPS completion endpoint (localhost only)");
            }
            _ => {
                tracing::error!(base_url = %base_url, "Rejecting non-HTTPS base URL");
                return Err(ContentError::InsecureBaseUrl);
            }
        }

        if base_url.trim_end_matches('/') != DEFAULT_BASE_URL {
            tracing::info!(base_url = %base_url, "Using custom completion API base URL");
        }

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_secs(1),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retries transient failures up to `max_retries` times, waiting
    /// `base_delay`, then twice that, and so on.
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends `prompt` as a single user message and returns the reply text.
    pub async fn complete(&self, prompt: &str) -> Result<String, ContentError> {
        let body = serde_json::to_vec(&ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        })
        .map_err(|e| ContentError::InvalidResponse(format!("failed to encode request: {}", e)))?;

        tracing::info!(model = %self.model, prompt_len = prompt.len(), "Requesting newsletter content");

        let mut retry_count = 0;
        loop {
            match self.request_once(&body).await {
                Ok(content) => {
                    tracing::debug!(content_len = content.len(), "Completion received");
                    return Ok(content);
                }
                Err(e) if e.is_retryable() && retry_count < self.max_retries => {
                    let delay = self.retry_base_delay * (1u32 << retry_count);
                    tracing::warn!(
                        error = %e,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying completion request after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One attempt. The deadline covers the whole exchange: a server that
    /// sends headers and then stalls mid-body still times out.
    async fn request_once(&self, body: &[u8]) -> Result<String, ContentError> {
        tokio::time::timeout(self.timeout, self.exchange(body))
            .await
            .map_err(|_| ContentError::Timeout(self.timeout.as_secs()))?
    }

    async fn exchange(&self, body: &[u8]) -> Result<String, ContentError> {
        let request = self
            .http
            .post(&self.endpoint)
            .header(
                AUTHORIZATION,
                // SEC-004: The key is exposed only here, never logged or kept in Debug output
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());

        let response = request.send().await.map_err(ContentError::Network)?;

        if !response.status().is_success() {
            return Err(ContentError::HttpStatus(response.status().as_u16()));
        }

        // SEC-003: Bounded read so a misbehaving endpoint cannot exhaust memory
        let text = read_limited_text(response, MAX_RESPONSE_SIZE).await?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| ContentError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ContentError::EmptyCompletion)
    }
}

async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, ContentError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ContentError::Network)?;
        // saturating_add: no overflow in the size check
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes).map_err(|_| ContentError::InvalidUtf8)
}
