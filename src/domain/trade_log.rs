use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    NoEntry,
    Open,
}

/// How the outcome was determined. Fallback results must stay
/// distinguishable from real replays in every artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMethod {
    RealPriceData,
    HashBasedFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub outcome: Outcome,
    pub entry_time: Option<DateTime<Utc>>,
    pub entry_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub pnl_pips: Decimal,
    pub method: FillMethod,
}

impl Execution {
    pub fn no_entry(method: FillMethod) -> Self {
        Self {
            outcome: Outcome::NoEntry,
            entry_time: None,
            entry_price: None,
            exit_time: None,
            exit_price: None,
            pnl_pips: Decimal::ZERO,
            method,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryQuality {
    Good,
    Slippage,
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitTiming {
    StoppedOut,
    TargetHit,
    SessionClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryVerdict {
    Helpful,
    Harmful,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub entry_quality: EntryQuality,
    pub exit_timing: Option<ExitTiming>,
    pub unexpected_events: Vec<String>,
    /// Per-cited-entry verdict for the reflector; keys are playbook entry IDs.
    pub playbook_entries_feedback: BTreeMap<String, EntryVerdict>,
}

/// The executor's record of how one plan played out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLog {
    /// Equal to the plan's date.
    pub plan_id: NaiveDate,
    pub execution: Execution,
    pub feedback: Feedback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Outcome::NoEntry).unwrap(),
            "\"no_entry\""
        );
        assert_eq!(
            serde_json::to_string(&FillMethod::HashBasedFallback).unwrap(),
            "\"hash_based_fallback\""
        );
        assert_eq!(
            serde_json::to_string(&ExitTiming::StoppedOut).unwrap(),
            "\"stopped_out\""
        );
    }

    #[test]
    fn test_no_entry_execution_is_empty() {
        let execution = Execution::no_entry(FillMethod::RealPriceData);
        assert_eq!(execution.outcome, Outcome::NoEntry);
        assert!(execution.entry_price.is_none());
        assert!(execution.exit_price.is_none());
        assert_eq!(execution.pnl_pips, Decimal::ZERO);
    }
}
