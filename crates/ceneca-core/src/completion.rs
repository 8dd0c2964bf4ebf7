//! Completion Service (C6): a uniform multi-provider chat/text completion
//! contract with typed circuit-breaker fallback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// One message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    /// Message content.
    pub content: String,
}

/// Parameters common to every completion call.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// A single streamed completion event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChunk {
    /// Chunk text, if any.
    pub text: Option<String>,
    /// Whether this is the terminal chunk.
    pub is_final: bool,
}

/// The uniform contract every completion provider implements.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Stable provider name used in logs/metrics/circuit-breaker keys.
    fn name(&self) -> &str;

    /// Single-shot completion.
    async fn complete(&self, params: &CompletionParams) -> std::result::Result<String, ProviderError>;

    /// Streaming completion.
    async fn stream(
        &self,
        params: &CompletionParams,
    ) -> std::result::Result<Vec<CompletionChunk>, ProviderError>;
}

/// A provider-level failure, distinguished by whether it's worth failing
/// over to the next provider for.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Transient: rate limited, connection reset, timeout.
    #[error("retryable provider error: {0}")]
    Retryable(String),
    /// Permanent: bad request, auth failure, unsupported model.
    #[error("non-retryable provider error: {0}")]
    NonRetryable(String),
}

impl ProviderError {
    fn retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable(_))
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Calls pass through normally.
    Closed,
    /// Calls short-circuit-fail without reaching the provider.
    Open,
    /// One probe call is allowed through; success closes, failure re-opens.
    HalfOpen,
}

/// Per-provider circuit breaker configuration.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures within `recovery_window` before opening.
    pub threshold: u32,
    /// How long the breaker stays open before allowing a probe.
    pub recovery_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            recovery_window: Duration::from_secs(30),
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// A single provider's circuit breaker.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// A new, closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state, transitioning `Open → HalfOpen` if the recovery
    /// window has elapsed.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.recovery_window {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
        inner.state
    }

    /// Record a successful call: closes the breaker and resets the failure
    /// counter.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call: opens the breaker once `threshold` consecutive
    /// failures have been observed (or immediately re-opens from
    /// half-open).
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            return;
        }
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.config.threshold {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// A registered provider plus its circuit breaker.
struct RegisteredProvider {
    provider: Arc<dyn CompletionProvider>,
    breaker: CircuitBreaker,
}

/// Multi-provider completion service with priority-ordered fallback.
pub struct CompletionService {
    providers: Vec<RegisteredProvider>,
}

impl Default for CompletionService {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionService {
    /// An empty service; register providers with [`Self::register`].
    #[must_use]
    pub fn new() -> Self {
        Self { providers: Vec::new() }
    }

    /// Register a provider at the end of the priority order.
    pub fn register(&mut self, provider: Arc<dyn CompletionProvider>, breaker_config: BreakerConfig) {
        self.providers.push(RegisteredProvider {
            provider,
            breaker: CircuitBreaker::new(breaker_config),
        });
    }

    /// Complete via the first available provider, failing over to the next
    /// on a non-retryable error or an open circuit.
    pub async fn complete(&self, params: &CompletionParams) -> Result<String> {
        let mut last_err: Option<String> = None;
        for registered in &self.providers {
            match registered.breaker.state() {
                BreakerState::Open => {
                    last_err = Some(format!("{}: circuit open", registered.provider.name()));
                    continue;
                }
                BreakerState::Closed | BreakerState::HalfOpen => {}
            }

            match registered.provider.complete(params).await {
                Ok(text) => {
                    registered.breaker.record_success();
                    return Ok(text);
                }
                Err(e) => {
                    registered.breaker.record_failure();
                    tracing::warn!(provider = registered.provider.name(), error = %e, "completion provider failed");
                    last_err = Some(e.to_string());
                    if !e.retryable() {
                        continue;
                    }
                }
            }
        }
        Err(Error::CircuitOpen {
            provider: last_err.unwrap_or_else(|| "no providers registered".to_string()),
        })
    }

    /// Parse a provider's response as typed JSON, tolerating providers that
    /// return either a JSON blob or plain text wrapping one.
    pub fn parse_json_response<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
        if let Ok(value) = serde_json::from_str::<T>(raw) {
            return Ok(value);
        }
        // Providers sometimes wrap JSON in a code fence or prose; look for
        // the first '{' ... last '}' span.
        let start = raw.find('{');
        let end = raw.rfind('}');
        if let (Some(s), Some(e)) = (start, end) {
            if e > s {
                if let Ok(value) = serde_json::from_str::<T>(&raw[s..=e]) {
                    return Ok(value);
                }
            }
        }
        Err(Error::Execution(crate::error::ExecutionError::AggregationFailed(format!(
            "could not parse provider response as JSON: {raw}"
        ))))
    }
}

/// The canonical streaming event shape (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Discriminates the event's meaning.
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// The session this event belongs to.
    pub session_id: String,
    /// Text content, for partial/complete content events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Chunk index, for partial content events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    /// Whether this event is terminal for its node/stream.
    #[serde(default)]
    pub is_final: bool,
    /// Freeform structured payload (node ids, plan previews, etc.).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// The closed set of streaming event types (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    /// A free-text status update.
    Status,
    /// A partial content chunk.
    PartialContent,
    /// The final content chunk for a stream.
    ContentComplete,
    /// A coalesced progress heartbeat (used under backpressure).
    Progress,
    /// A chunk of streamed analysis text.
    AnalysisChunk,
    /// An error occurred.
    Error,
    /// The orchestrator chose a route.
    RoutingDecision,
    /// A node began executing.
    NodeStart,
    /// A node finished executing.
    NodeComplete,
    /// The whole workflow began.
    WorkflowStart,
    /// The whole workflow finished.
    WorkflowComplete,
}
