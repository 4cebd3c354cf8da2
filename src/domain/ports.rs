use crate::domain::errors::LlmError;
use crate::domain::market::{Candle, MarketSnapshot, SessionWindow};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;

/// Per-category safety block threshold forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyThreshold {
    BlockNone,
    BlockLow,
    BlockMedium,
    BlockHigh,
}

/// Safety posture over the four recognized harm categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyPosture {
    pub harassment: SafetyThreshold,
    pub hate_speech: SafetyThreshold,
    pub sexually_explicit: SafetyThreshold,
    pub dangerous_content: SafetyThreshold,
}

impl Default for SafetyPosture {
    fn default() -> Self {
        // Finance prompts regularly trip the "dangerous content" heuristic.
        Self {
            harassment: SafetyThreshold::BlockHigh,
            hate_speech: SafetyThreshold::BlockHigh,
            sexually_explicit: SafetyThreshold::BlockHigh,
            dangerous_content: SafetyThreshold::BlockHigh,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub safety: SafetyPosture,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            max_output_tokens: 4096,
            safety: SafetyPosture::default(),
        }
    }
}

/// Normalized model response. A blocked response carries no usable text;
/// [`LlmResponse::text`] fails fast with a typed error instead of exposing
/// provider-specific fields to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    text: Option<String>,
    pub finish_reason: String,
    pub safety_signals: Vec<String>,
}

impl LlmResponse {
    pub fn completed(text: impl Into<String>, finish_reason: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            finish_reason: finish_reason.into(),
            safety_signals: Vec::new(),
        }
    }

    pub fn blocked(categories: Vec<String>) -> Self {
        Self {
            text: None,
            finish_reason: "SAFETY".to_string(),
            safety_signals: categories,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.text.is_none()
    }

    pub fn text(&self) -> Result<&str, LlmError> {
        self.text.as_deref().ok_or_else(|| LlmError::Blocked {
            categories: self.safety_signals.clone(),
        })
    }
}

/// Single-call request/response adapter over a text-generation model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        config: &GenerationConfig,
    ) -> Result<LlmResponse, LlmError>;
}

/// Thin interface over the external market-data collaborator.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_snapshot(&self, now: DateTime<Utc>) -> Result<MarketSnapshot>;

    /// Candles for the session window of `date`, ordered by open time.
    /// An empty vector means no data (weekend, holiday, upstream outage).
    async fn fetch_session_ohlc(
        &self,
        date: NaiveDate,
        window: &SessionWindow,
    ) -> Result<Vec<Candle>>;
}

/// Best-effort message sink; delivery failures are logged, never fatal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// A complete persisted bundle available for restoration.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleHandle {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// Cross-run state store for ephemeral infrastructure. A bundle is the whole
/// state tree (playbook + history + sessions + reflections + summary).
#[async_trait]
pub trait StateBundleStore: Send + Sync {
    async fn latest(&self) -> Result<Option<BundleHandle>>;
    async fn download(&self, handle: &BundleHandle, dest: &Path) -> Result<()>;
    async fn upload(&self, src: &Path, key: &str, created_at: DateTime<Utc>) -> Result<()>;
    /// Removes bundles created before `horizon`; returns how many went away.
    async fn prune_older_than(&self, horizon: DateTime<Utc>) -> Result<usize>;
}
