use crate::application::robust_json::RobustJsonDecoder;
use crate::domain::errors::{DecodeError, LlmError};
use crate::domain::market::MarketSnapshot;
use crate::domain::plan::TradingPlan;
use crate::domain::playbook::Playbook;
use crate::domain::ports::{GenerationConfig, LlmClient};
use anyhow::Result;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "\
You are a disciplined FX day-trading planner. Given a playbook of accumulated \
rules and a structured market snapshot, produce exactly one trading plan for \
the coming session.

Respond with a single JSON object and nothing else. Schema:
{
  \"date\": \"YYYY-MM-DD\",
  \"bias\": \"bullish\" | \"bearish\" | \"neutral\",
  \"entry_zone\": [low, high] or [],
  \"stop_loss\": number or null,
  \"take_profit_1\": number or null,
  \"take_profit_2\": number or null,
  \"position_size_pct\": number or null,
  \"risk_reward\": string or null,
  \"rationale\": string,
  \"playbook_entries_used\": [entry ids],
  \"confidence\": \"high\" | \"medium\" | \"low\"
}

Rules: for a bullish plan stop_loss < entry_zone < take_profit_1; mirrored \
for bearish. When no clean setup exists, return a neutral plan with empty \
numeric fields. This is a research exercise, not financial advice.";

/// Produces the daily [`TradingPlan`] from the playbook and snapshot with a
/// single model call. Every failure class collapses to a safe neutral plan;
/// the cycle never aborts here.
pub struct Generator {
    llm: Arc<dyn LlmClient>,
    decoder: RobustJsonDecoder,
    generation: GenerationConfig,
}

impl Generator {
    pub fn new(llm: Arc<dyn LlmClient>, decoder: RobustJsonDecoder, generation: GenerationConfig) -> Self {
        Self {
            llm,
            decoder,
            generation,
        }
    }

    pub async fn generate(&self, playbook: &Playbook, snapshot: &MarketSnapshot) -> TradingPlan {
        let date = snapshot.current_time_utc.date_naive();
        let user_prompt = match build_user_prompt(playbook, snapshot) {
            Ok(p) => p,
            Err(e) => {
                warn!("Generator: failed to serialize prompt context: {}", e);
                return TradingPlan::neutral(
                    date,
                    "internal error while preparing the prompt",
                    format!("prompt serialization: {}", e),
                );
            }
        };

        let response = match self
            .llm
            .generate(SYSTEM_PROMPT, &user_prompt, &self.generation)
            .await
        {
            Ok(r) => r,
            Err(e @ (LlmError::Transport { .. } | LlmError::Timeout { .. })) => {
                warn!("Generator: LLM call failed: {}", e);
                return TradingPlan::neutral(date, "model unavailable, standing aside", e.to_string());
            }
            Err(e @ LlmError::Blocked { .. }) => {
                warn!("Generator: LLM response blocked: {}", e);
                return TradingPlan::neutral(date, "model response blocked, standing aside", e.to_string());
            }
        };

        let text = match response.text() {
            Ok(t) => t,
            Err(e) => {
                warn!("Generator: {}", e);
                return TradingPlan::neutral(date, "model response blocked, standing aside", e.to_string());
            }
        };

        let value = match self.decoder.decode(text, snapshot.current_time_utc) {
            Ok(v) => v,
            Err(e @ DecodeError::EmptyResponse) => {
                warn!("Generator: empty model response");
                return TradingPlan::neutral(date, "empty model response, standing aside", e.to_string());
            }
            Err(e @ DecodeError::MalformedJson { .. }) => {
                warn!("Generator: undecodable model response");
                return TradingPlan::neutral(
                    date,
                    "undecodable model response, standing aside",
                    e.to_string(),
                );
            }
        };

        let mut plan: TradingPlan = match serde_json::from_value(value) {
            Ok(p) => p,
            Err(e) => {
                warn!("Generator: plan failed schema deserialization: {}", e);
                return TradingPlan::neutral(
                    date,
                    "plan did not match the required schema",
                    format!("schema violation: {}", e),
                );
            }
        };

        // The plan is keyed by the snapshot's date regardless of what the
        // model wrote.
        plan.date = date;

        if let Err(violation) = plan.validate() {
            warn!("Generator: {}", violation);
            return TradingPlan::neutral(
                date,
                "plan levels were inconsistent with its bias",
                violation.to_string(),
            );
        }

        let cited: Vec<&str> = plan
            .playbook_entries_used
            .iter()
            .map(String::as_str)
            .collect();
        info!(
            "Generator: {} plan for {} (confidence {}, cites {:?})",
            plan.bias, plan.date, plan.confidence, cited
        );
        plan
    }
}

fn build_user_prompt(playbook: &Playbook, snapshot: &MarketSnapshot) -> Result<String> {
    let mut prompt = String::new();

    writeln!(
        prompt,
        "## Playbook (version {}, {} entries)\n",
        playbook.metadata.version, playbook.metadata.total_entries
    )?;
    for (section, entries) in &playbook.sections {
        writeln!(prompt, "### {}", section)?;
        if entries.is_empty() {
            writeln!(prompt, "(empty)")?;
        }
        for entry in entries {
            writeln!(
                prompt,
                "- [{}] (helpful {}, harmful {}) {}",
                entry.id, entry.helpful_count, entry.harmful_count, entry.content
            )?;
        }
        writeln!(prompt)?;
    }

    writeln!(prompt, "## Market snapshot\n")?;
    writeln!(prompt, "{}", serde_json::to_string_pretty(snapshot)?)?;
    writeln!(prompt)?;
    writeln!(
        prompt,
        "Produce the plan for {}. Cite the IDs of every playbook entry you \
         relied on in playbook_entries_used.",
        snapshot.current_time_utc.date_naive()
    )?;

    Ok(prompt)
}
