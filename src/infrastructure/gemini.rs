use crate::domain::errors::LlmError;
use crate::domain::ports::{GenerationConfig, LlmClient, LlmResponse, SafetyThreshold};
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Adapter for the Gemini `generateContent` REST endpoint. Normalizes the
/// provider's three outcomes (text, blocked, transport error) into the
/// [`LlmClient`] contract so callers never peek at provider fields.
pub struct GeminiClient {
    client: ClientWithMiddleware,
    base_url: String,
    model: String,
    api_key: String,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(base_url: String, model: String, api_key: String, timeout_secs: u64) -> Self {
        // One generation call per cycle, so only transient faults are worth
        // retrying, and both attempts must fit inside the cycle's LLM budget.
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(400), Duration::from_secs(5))
            .build_with_max_retries(2);
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client: ClientBuilder::new(inner)
                .with(RetryTransientMiddleware::new_with_policy(retry_policy))
                .build(),
            base_url,
            model,
            api_key,
            timeout_secs,
        }
    }
}

// ===== Wire types =====

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: WireGenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafetyRating {
    category: String,
    #[serde(default)]
    probability: Option<String>,
}

fn threshold_str(threshold: SafetyThreshold) -> &'static str {
    match threshold {
        SafetyThreshold::BlockNone => "BLOCK_NONE",
        SafetyThreshold::BlockLow => "BLOCK_LOW_AND_ABOVE",
        SafetyThreshold::BlockMedium => "BLOCK_MEDIUM_AND_ABOVE",
        SafetyThreshold::BlockHigh => "BLOCK_ONLY_HIGH",
    }
}

fn safety_settings(config: &GenerationConfig) -> Vec<SafetySetting> {
    vec![
        SafetySetting {
            category: "HARM_CATEGORY_HARASSMENT",
            threshold: threshold_str(config.safety.harassment),
        },
        SafetySetting {
            category: "HARM_CATEGORY_HATE_SPEECH",
            threshold: threshold_str(config.safety.hate_speech),
        },
        SafetySetting {
            category: "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            threshold: threshold_str(config.safety.sexually_explicit),
        },
        SafetySetting {
            category: "HARM_CATEGORY_DANGEROUS_CONTENT",
            threshold: threshold_str(config.safety.dangerous_content),
        },
    ]
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        config: &GenerationConfig,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let body = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_prompt,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: user_prompt }],
            }],
            generation_config: WireGenerationConfig {
                temperature: config.temperature,
                max_output_tokens: config.max_output_tokens,
            },
            safety_settings: safety_settings(config),
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let timed_out = matches!(
                    &e,
                    reqwest_middleware::Error::Reqwest(inner) if inner.is_timeout()
                );
                if timed_out {
                    LlmError::Timeout {
                        seconds: self.timeout_secs,
                    }
                } else {
                    LlmError::Transport {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Transport {
                reason: format!("HTTP {}: {}", status, truncate(&detail, 300)),
            });
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            LlmError::Transport {
                reason: format!("unreadable response body: {}", e),
            }
        })?;

        // Prompt-level block: no candidates at all.
        if let Some(feedback) = &parsed.prompt_feedback
            && feedback.block_reason.is_some()
        {
            let categories = blocked_categories(&feedback.safety_ratings);
            warn!(
                "GeminiClient: prompt blocked ({:?}): {:?}",
                feedback.block_reason, categories
            );
            return Ok(LlmResponse::blocked(categories));
        }

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            warn!("GeminiClient: response carried no candidates");
            return Ok(LlmResponse::blocked(Vec::new()));
        };

        let finish_reason = candidate.finish_reason.unwrap_or_else(|| "STOP".to_string());

        let text: String = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        // Candidate-level block: finish reason SAFETY, or no usable parts.
        if finish_reason == "SAFETY" || text.is_empty() {
            let categories = blocked_categories(&candidate.safety_ratings);
            warn!(
                "GeminiClient: candidate blocked (finish {}): {:?}",
                finish_reason, categories
            );
            return Ok(LlmResponse::blocked(categories));
        }

        debug!(
            "GeminiClient: {} chars, finish {}",
            text.len(),
            finish_reason
        );
        Ok(LlmResponse::completed(text, finish_reason))
    }
}

fn blocked_categories(ratings: &[SafetyRating]) -> Vec<String> {
    ratings
        .iter()
        .filter(|r| {
            matches!(
                r.probability.as_deref(),
                Some("MEDIUM") | Some("HIGH") | None
            )
        })
        .map(|r| r.category.clone())
        .collect()
}

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
