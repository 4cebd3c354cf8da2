use crate::application::robust_json::RobustJsonDecoder;
use crate::domain::plan::TradingPlan;
use crate::domain::ports::{GenerationConfig, LlmClient};
use crate::domain::reflection::{
    Insight, ReflectionReport, ReflectionWindow, WeeklySummary,
};
use crate::domain::trade_log::{Outcome, TradeLog};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "\
You are the reflection stage of a trading research loop. You receive one \
week of trade results and must propose playbook updates.

Respond with a single JSON object and nothing else. Schema:
{
  \"insights\": [
    {
      \"kind\": \"success_pattern\" | \"failure_pattern\" | \"outdated_rule\",
      \"description\": string,
      \"evidence_plan_ids\": [\"YYYY-MM-DD\", ...],
      \"suggested_action\": \"add_entry\" | \"increment_helpful\" | \"increment_harmful\" | \"prune\",
      \"target_section\": string or null,
      \"target_entry_id\": string or null,
      \"proposed_content\": string or null,
      \"priority\": \"high\" | \"medium\" | \"low\"
    }
  ],
  \"market_regime_notes\": string
}

Favor concrete, testable changes grounded in the evidence. Reference only \
entry IDs that appear in the evidence. Do not restate the summary.";

/// What the model is asked to produce; window and summary are computed
/// deterministically on our side and never trusted from the response.
#[derive(Debug, Deserialize)]
struct ProposedReflection {
    #[serde(default)]
    insights: Vec<Insight>,
    #[serde(default)]
    market_regime_notes: String,
}

/// Weekly ACE role: deterministic statistics plus a single LLM call for the
/// qualitative insights. Failures degrade to an empty-insights report so the
/// curator simply has nothing to apply.
pub struct Reflector {
    llm: Arc<dyn LlmClient>,
    decoder: RobustJsonDecoder,
    generation: GenerationConfig,
    max_insights: usize,
}

impl Reflector {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        decoder: RobustJsonDecoder,
        generation: GenerationConfig,
        max_insights: usize,
    ) -> Self {
        Self {
            llm,
            decoder,
            generation,
            max_insights,
        }
    }

    pub async fn reflect(
        &self,
        window: ReflectionWindow,
        week: &[(TradingPlan, TradeLog)],
        now: DateTime<Utc>,
    ) -> ReflectionReport {
        let summary = summarize(week);
        info!(
            "Reflector: week {} - {} has {} trades ({} wins, {} losses, {} no-entries)",
            window.start, window.end, summary.total_trades, summary.wins, summary.losses,
            summary.no_entries
        );

        if week.is_empty() {
            return ReflectionReport::empty(window, summary, "no trade logs in the window");
        }

        let user_prompt = build_evidence_bundle(window, &summary, week, self.max_insights);

        let response = match self
            .llm
            .generate(SYSTEM_PROMPT, &user_prompt, &self.generation)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Reflector: LLM call failed: {}", e);
                return ReflectionReport::empty(window, summary, e.to_string());
            }
        };

        let text = match response.text() {
            Ok(t) => t,
            Err(e) => {
                warn!("Reflector: {}", e);
                return ReflectionReport::empty(window, summary, e.to_string());
            }
        };

        let value = match self.decoder.decode(text, now) {
            Ok(v) => v,
            Err(e) => {
                warn!("Reflector: undecodable model response: {}", e);
                return ReflectionReport::empty(window, summary, e.to_string());
            }
        };

        let proposed: ProposedReflection = match serde_json::from_value(value) {
            Ok(p) => p,
            Err(e) => {
                warn!("Reflector: response failed schema deserialization: {}", e);
                return ReflectionReport::empty(window, summary, format!("schema violation: {}", e));
            }
        };

        let mut insights = proposed.insights;
        insights.retain(|insight| {
            let ok = insight.is_actionable();
            if !ok {
                warn!(
                    "Reflector: dropping non-actionable insight ({:?} without target): {}",
                    insight.suggested_action, insight.description
                );
            }
            ok
        });
        if insights.len() > self.max_insights {
            warn!(
                "Reflector: model proposed {} insights, keeping the first {}",
                insights.len(),
                self.max_insights
            );
            insights.truncate(self.max_insights);
        }

        ReflectionReport {
            window,
            summary,
            insights,
            market_regime_notes: proposed.market_regime_notes,
            error: None,
        }
    }
}

/// Deterministic aggregate statistics; no LLM involved.
pub fn summarize(week: &[(TradingPlan, TradeLog)]) -> WeeklySummary {
    let mut wins = 0usize;
    let mut losses = 0usize;
    let mut no_entries = 0usize;
    let mut total_pips = Decimal::ZERO;
    let mut win_pips = Decimal::ZERO;
    let mut loss_pips = Decimal::ZERO;

    for (_, log) in week {
        total_pips += log.execution.pnl_pips;
        match log.execution.outcome {
            Outcome::Win => {
                wins += 1;
                win_pips += log.execution.pnl_pips;
            }
            Outcome::Loss => {
                losses += 1;
                loss_pips += log.execution.pnl_pips;
            }
            Outcome::NoEntry => no_entries += 1,
            Outcome::Open => {}
        }
    }

    let decided = wins + losses;
    WeeklySummary {
        total_trades: week.len(),
        wins,
        losses,
        no_entries,
        win_rate: if decided == 0 {
            0.0
        } else {
            wins as f64 / decided as f64
        },
        total_pips,
        avg_win_pips: if wins == 0 {
            Decimal::ZERO
        } else {
            win_pips / Decimal::from(wins)
        },
        avg_loss_pips: if losses == 0 {
            Decimal::ZERO
        } else {
            loss_pips / Decimal::from(losses)
        },
    }
}

fn build_evidence_bundle(
    window: ReflectionWindow,
    summary: &WeeklySummary,
    week: &[(TradingPlan, TradeLog)],
    max_insights: usize,
) -> String {
    let mut bundle = String::new();
    let _ = writeln!(
        bundle,
        "## Week {} - {}\n\nSummary: {} trades, {} wins, {} losses, {} no-entries, \
         win rate {:.0}%, {} pips total.\n",
        window.start,
        window.end,
        summary.total_trades,
        summary.wins,
        summary.losses,
        summary.no_entries,
        summary.win_rate * 100.0,
        summary.total_pips
    );

    let _ = writeln!(bundle, "## Trades\n");
    for (plan, log) in week {
        let cited: Vec<&str> = log
            .feedback
            .playbook_entries_feedback
            .keys()
            .map(String::as_str)
            .collect();
        let rationale_fragment: String = plan.rationale.chars().take(160).collect();
        let _ = writeln!(
            bundle,
            "- {} {} (confidence {}): {:?}, {} pips, method {:?}, cited {:?}. Rationale: {}",
            plan.date,
            plan.bias,
            plan.confidence,
            log.execution.outcome,
            log.execution.pnl_pips,
            log.execution.method,
            cited,
            rationale_fragment
        );
        for event in &log.feedback.unexpected_events {
            let _ = writeln!(bundle, "  unexpected: {}", event);
        }
    }

    let _ = writeln!(
        bundle,
        "\nPropose at most {} insights as specified.",
        max_insights
    );
    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::LlmError;
    use crate::domain::plan::{Bias, Confidence};
    use crate::domain::ports::LlmResponse;
    use crate::domain::reflection::SuggestedAction;
    use crate::domain::trade_log::{
        EntryQuality, Execution, Feedback, FillMethod,
    };
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    struct ScriptedLlm(Option<LlmResponse>);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _config: &GenerationConfig,
        ) -> Result<LlmResponse, LlmError> {
            self.0.clone().ok_or(LlmError::Transport {
                reason: "down".to_string(),
            })
        }
    }

    fn day(date: &str, outcome: Outcome, pips: Decimal) -> (TradingPlan, TradeLog) {
        let date: NaiveDate = date.parse().unwrap();
        let plan = TradingPlan {
            date,
            bias: Bias::Bullish,
            entry_zone: vec![dec!(1.0840), dec!(1.0850)],
            stop_loss: Some(dec!(1.0820)),
            take_profit_1: Some(dec!(1.0900)),
            take_profit_2: None,
            position_size_pct: None,
            risk_reward: None,
            rationale: "trend continuation".to_string(),
            playbook_entries_used: vec!["strat-onlytaketr".to_string()],
            confidence: Confidence::Medium,
            error: None,
        };
        let log = TradeLog {
            plan_id: date,
            execution: Execution {
                outcome,
                entry_time: None,
                entry_price: Some(dec!(1.0845)),
                exit_time: None,
                exit_price: None,
                pnl_pips: pips,
                method: FillMethod::RealPriceData,
            },
            feedback: Feedback {
                entry_quality: EntryQuality::Good,
                exit_timing: None,
                unexpected_events: vec![],
                playbook_entries_feedback: BTreeMap::from([(
                    "strat-onlytaketr".to_string(),
                    crate::domain::trade_log::EntryVerdict::Neutral,
                )]),
            },
        };
        (plan, log)
    }

    fn window() -> ReflectionWindow {
        ReflectionWindow::trading_week_containing("2025-10-29".parse().unwrap())
    }

    fn now() -> DateTime<Utc> {
        "2025-10-31T18:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_summary_statistics() {
        let week = vec![
            day("2025-10-27", Outcome::Win, dec!(54)),
            day("2025-10-28", Outcome::Loss, dec!(-26)),
            day("2025-10-29", Outcome::Win, dec!(30)),
            day("2025-10-30", Outcome::NoEntry, dec!(0)),
        ];
        let summary = summarize(&week);
        assert_eq!(summary.total_trades, 4);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.no_entries, 1);
        assert!((summary.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.total_pips, dec!(58));
        assert_eq!(summary.avg_win_pips, dec!(42));
        assert_eq!(summary.avg_loss_pips, dec!(-26));
    }

    #[tokio::test]
    async fn test_valid_insights_are_kept_and_capped() {
        let response = r#"{
            "insights": [
                {"kind": "success_pattern", "description": "trend days pay",
                 "evidence_plan_ids": ["2025-10-27"],
                 "suggested_action": "increment_helpful",
                 "target_entry_id": "strat-onlytaketr", "priority": "high"},
                {"kind": "failure_pattern", "description": "missing target",
                 "suggested_action": "prune", "priority": "low"}
            ],
            "market_regime_notes": "steady uptrend"
        }"#;
        let reflector = Reflector::new(
            Arc::new(ScriptedLlm(Some(LlmResponse::completed(response, "STOP")))),
            RobustJsonDecoder::new(),
            GenerationConfig::default(),
            5,
        );
        let week = vec![day("2025-10-27", Outcome::Win, dec!(54))];
        let report = reflector.reflect(window(), &week, now()).await;

        assert!(report.error.is_none());
        // The prune insight has no target_entry_id and must be dropped.
        assert_eq!(report.insights.len(), 1);
        assert_eq!(
            report.insights[0].suggested_action,
            SuggestedAction::IncrementHelpful
        );
        assert_eq!(report.market_regime_notes, "steady uptrend");
        assert_eq!(report.summary.wins, 1);
    }

    #[tokio::test]
    async fn test_llm_failure_yields_empty_report_with_error() {
        let reflector = Reflector::new(
            Arc::new(ScriptedLlm(None)),
            RobustJsonDecoder::new(),
            GenerationConfig::default(),
            5,
        );
        let week = vec![day("2025-10-27", Outcome::Win, dec!(54))];
        let report = reflector.reflect(window(), &week, now()).await;

        assert!(report.insights.is_empty());
        assert!(report.error.as_deref().unwrap().contains("transport"));
        assert_eq!(report.summary.total_trades, 1);
    }

    #[tokio::test]
    async fn test_empty_window_skips_llm() {
        let reflector = Reflector::new(
            Arc::new(ScriptedLlm(None)), // would fail if called
            RobustJsonDecoder::new(),
            GenerationConfig::default(),
            5,
        );
        let report = reflector.reflect(window(), &[], now()).await;
        assert!(report.insights.is_empty());
        assert!(report.error.as_deref().unwrap().contains("no trade logs"));
    }

    #[tokio::test]
    async fn test_malformed_response_yields_empty_report() {
        let reflector = Reflector::new(
            Arc::new(ScriptedLlm(Some(LlmResponse::completed("oops", "STOP")))),
            RobustJsonDecoder::new(),
            GenerationConfig::default(),
            5,
        );
        let week = vec![day("2025-10-27", Outcome::Win, dec!(54))];
        let report = reflector.reflect(window(), &week, now()).await;
        assert!(report.insights.is_empty());
        assert!(report.error.is_some());
    }

    #[test]
    fn test_evidence_bundle_mentions_trades_and_cap() {
        let week = vec![day("2025-10-27", Outcome::Win, dec!(54))];
        let summary = summarize(&week);
        let bundle = build_evidence_bundle(window(), &summary, &week, 5);
        assert!(bundle.contains("2025-10-27"));
        assert!(bundle.contains("strat-onlytaketr"));
        assert!(bundle.contains("at most 5 insights"));
    }
}
