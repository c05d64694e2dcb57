//! Remote answer endpoint client.
//!
//! Provides the [`AnswerEndpoint`] seam used by the queue and retriever, and an
//! HTTP implementation speaking the generateContent wire shape.
//!
//! ### Protocol
//!
//! - **Request**: `POST {endpoint_url}` with body `{"contents":[{"parts":[{"text": prompt}]}]}`.
//! - **Authentication**: `x-goog-api-key` header when an API key is configured.
//! - **Response**: the answer is the concatenated `candidates[0].content.parts[*].text`.
//! - **Errors**: non-2xx becomes `Endpoint{status, details}` with the body truncated
//!   to 200 chars; transport failures become `Network`; expiry becomes `Timeout`.

pub mod error;
pub mod request;
pub mod response;

pub use error::EndpointError;
pub use request::{AnswerPrompt, GenerateRequest};
pub use response::{DEFAULT_CONFIDENCE, GenerateResponse, ParsedAnswer, parse_answer};

use async_trait::async_trait;
use recall_core::{AppConfig, Error};
use reqwest::header;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Something that turns a prompt into raw reply text.
///
/// The queue and the retriever only ever talk to this trait, so tests can
/// script replies without a network.
#[async_trait]
pub trait AnswerEndpoint: Send + Sync + std::fmt::Debug {
    async fn complete(&self, prompt: &str) -> Result<String, Error>;
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
}

impl From<&AppConfig> for EndpointConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            url: config.endpoint_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout(),
            user_agent: config.user_agent.clone(),
        }
    }
}

/// reqwest-backed [`AnswerEndpoint`].
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    http: reqwest::Client,
    url: url::Url,
    config: EndpointConfig,
}

impl HttpEndpoint {
    /// Create a new endpoint client with the given configuration.
    pub fn new(config: EndpointConfig) -> Result<Self, EndpointError> {
        let url = url::Url::parse(&config.url).map_err(|e| EndpointError::InvalidUrl(format!("{}: {e}", config.url)))?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| EndpointError::Network(Arc::new(e)))?;

        Ok(Self { http, url, config })
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout.as_millis() as u64
    }

    /// Send one generateContent request and return the reply text.
    pub async fn generate(&self, prompt: &str) -> Result<String, EndpointError> {
        let start = Instant::now();
        let body = GenerateRequest::from_prompt(prompt);

        tracing::debug!(url = %self.url, prompt_len = prompt.len(), "calling answer endpoint");

        let mut builder = self
            .http
            .post(self.url.clone())
            .header(header::ACCEPT, "application/json")
            .json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.header(API_KEY_HEADER, key);
        }

        let http_response = builder
            .send()
            .await
            .map_err(|e| EndpointError::from_transport(e, self.timeout_ms()))?;

        let status = http_response.status();
        tracing::debug!("answer endpoint response status: {}", status);

        if !status.is_success() {
            let text = http_response.text().await.unwrap_or_default();
            return Err(EndpointError::http(status.as_u16(), &text));
        }

        let bytes = http_response
            .bytes()
            .await
            .map_err(|e| EndpointError::from_transport(e, self.timeout_ms()))?;
        let raw: GenerateResponse = serde_json::from_slice(&bytes).map_err(|e| EndpointError::Parse(e.to_string()))?;
        let text = raw.into_text()?;

        tracing::debug!("answer endpoint completed in {:?}, {} chars", start.elapsed(), text.len());
        Ok(text)
    }
}

#[async_trait]
impl AnswerEndpoint for HttpEndpoint {
    async fn complete(&self, prompt: &str) -> Result<String, Error> {
        Ok(self.generate(prompt).await?)
    }
}

/// One endpoint attempt under `timeout`, parsed into an answer.
///
/// Expiry drops the in-flight call and reports [`Error::Timeout`].
pub async fn dispatch_once(endpoint: &dyn AnswerEndpoint, prompt: &str, timeout: Duration) -> Result<ParsedAnswer, Error> {
    let reply = match tokio::time::timeout(timeout, endpoint.complete(prompt)).await {
        Ok(reply) => reply?,
        Err(_) => return Err(Error::Timeout(timeout.as_millis() as u64)),
    };

    Ok(parse_answer(&reply)?)
}
