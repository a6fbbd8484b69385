//! Stage 2 — LM classification
//!
//! The classifier pipeline is deliberately agnostic to which model answers
//! it: `LmClassifier` is the seam, `OpenAiClassifier` one concrete
//! implementation of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::Classification;

/// Base delay for the exponential backoff between LM retry attempts.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("no api key configured")]
    NoApiKey,
}

/// Stage 2's raw output before episodic adjustment and arbitration.
#[derive(Debug, Clone)]
pub struct LmResponse {
    pub page_type: Classification,
    pub confidence: f32,
    pub reasoning: String,
    pub should_process: bool,
}

impl LmResponse {
    fn parse_fail() -> Self {
        Self {
            page_type: Classification::Other,
            confidence: 0.0,
            reasoning: "parse_fail".to_string(),
            should_process: false,
        }
    }

    /// Default response once every retry attempt has failed at the
    /// transport level (timeout, rate limit, non-2xx).
    fn lm_fail() -> Self {
        Self {
            page_type: Classification::Other,
            confidence: 0.0,
            reasoning: "lm_fail".to_string(),
            should_process: false,
        }
    }
}

/// A classifier backend. Given a URL and the first 2000 characters of page
/// content, returns a best-effort classification. Implementations must
/// never panic and should map transport failures into a `parse_fail`
/// response rather than propagating them, so one flaky call degrades a
/// single page instead of the whole pipeline.
#[async_trait]
pub trait LmClassifier: Send + Sync {
    async fn classify(&self, url: &str, content_first_2k: &str) -> LmResponse;
}

#[async_trait]
impl<T: LmClassifier + ?Sized> LmClassifier for Arc<T> {
    async fn classify(&self, url: &str, content_first_2k: &str) -> LmResponse {
        (**self).classify(url, content_first_2k).await
    }
}

#[derive(Deserialize)]
struct RawLmPayload {
    page_type: String,
    confidence: f32,
    reasoning: String,
    should_process: bool,
}

fn parse_payload(raw: &str) -> LmResponse {
    let Ok(payload) = serde_json::from_str::<RawLmPayload>(raw) else {
        return LmResponse::parse_fail();
    };
    let Some(page_type) = Classification::parse(&payload.page_type) else {
        return LmResponse::parse_fail();
    };
    if !(0.0..=1.0).contains(&payload.confidence) {
        return LmResponse::parse_fail();
    }
    LmResponse {
        page_type,
        confidence: payload.confidence,
        reasoning: payload.reasoning,
        should_process: payload.should_process,
    }
}

/// Calls an OpenAI-compatible chat completion endpoint with a prompt asking
/// for the Stage 2 JSON schema, via an `OPENAI_API_KEY`.
pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAiClassifier {
    pub fn new(api_key: String, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
            max_retries: max_retries.max(1),
        }
    }

    fn prompt(url: &str, content_first_2k: &str) -> String {
        format!(
            "Classify the following page. Respond with a single JSON object \
             {{\"page_type\": one of knowledge|interactive_app|aggregator|leisure|navigation|other, \
             \"confidence\": 0..1, \"reasoning\": at most ten words, \"should_process\": boolean}}.\n\
             URL: {url}\nContent: {content_first_2k}"
        )
    }

    /// One attempt at the request. `Err` carries a short description of
    /// what went wrong (transport error or non-2xx status); it never reads
    /// the response body as JSON, so a malformed body never lands here.
    async fn try_once(&self, body: &serde_json::Value) -> Result<String, String> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("http status {}", response.status()));
        }

        response.text().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl LmClassifier for OpenAiClassifier {
    async fn classify(&self, url: &str, content_first_2k: &str) -> LmResponse {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": Self::prompt(url, content_first_2k)}],
            "response_format": {"type": "json_object"},
        });

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_once(&body).await {
                Ok(text) => {
                    let content = extract_message_content(&text).unwrap_or(text);
                    return parse_payload(&content);
                }
                Err(e) => {
                    tracing::warn!(error = %e, url = %url, attempt, "lm request failed");
                    if attempt >= self.max_retries {
                        return LmResponse::lm_fail();
                    }
                    let backoff = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

fn extract_message_content(raw: &str) -> Option<String> {
    serde_json::from_str::<ChatCompletion>(raw)
        .ok()
        .and_then(|c| c.choices.into_iter().next())
        .map(|c| c.message.content)
}

/// A classifier that always returns a fixed response. Used in tests and as
/// a placeholder when no API key is configured.
pub struct StaticClassifier(pub LmResponse);

#[async_trait]
impl LmClassifier for StaticClassifier {
    async fn classify(&self, _url: &str, _content_first_2k: &str) -> LmResponse {
        LmResponse {
            page_type: self.0.page_type,
            confidence: self.0.confidence,
            reasoning: self.0.reasoning.clone(),
            should_process: self.0.should_process,
        }
    }
}

/// Bounds the number of classification calls in flight across every caller
/// of `inner` — the consumer and the retry timer both classify through the
/// same pipeline, so without a shared gate a burst of retries could pile
/// unbounded concurrent requests onto the LM backend.
pub struct PooledLmClassifier<C> {
    inner: C,
    permits: tokio::sync::Semaphore,
}

impl<C: LmClassifier> PooledLmClassifier<C> {
    pub fn new(inner: C, pool_size: usize) -> Self {
        Self {
            inner,
            permits: tokio::sync::Semaphore::new(pool_size.max(1)),
        }
    }
}

#[async_trait]
impl<C: LmClassifier> LmClassifier for PooledLmClassifier<C> {
    async fn classify(&self, url: &str, content_first_2k: &str) -> LmResponse {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("semaphore is never closed");
        self.inner.classify(url, content_first_2k).await
    }
}
