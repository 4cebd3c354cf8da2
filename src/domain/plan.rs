use crate::domain::errors::SchemaViolation;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bias::Bullish => write!(f, "bullish"),
            Bias::Bearish => write!(f, "bearish"),
            Bias::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

/// The generator's daily output and the executor's input.
///
/// A `neutral` plan may leave every numeric field empty. For a directional
/// plan, `entry_zone` holds the two ordered bounds and the stop sits on the
/// opposite side of the zone from `take_profit_1` (see [`TradingPlan::validate`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPlan {
    pub date: NaiveDate,
    pub bias: Bias,
    #[serde(default)]
    pub entry_zone: Vec<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit_1: Option<Decimal>,
    #[serde(default)]
    pub take_profit_2: Option<Decimal>,
    #[serde(default)]
    pub position_size_pct: Option<Decimal>,
    #[serde(default)]
    pub risk_reward: Option<String>,
    pub rationale: String,
    #[serde(default)]
    pub playbook_entries_used: Vec<String>,
    pub confidence: Confidence,
    /// Set when the pipeline degraded this plan; authoritative in artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TradingPlan {
    /// Safe fallback plan emitted for every generator failure class.
    pub fn neutral(date: NaiveDate, rationale: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            date,
            bias: Bias::Neutral,
            entry_zone: Vec::new(),
            stop_loss: None,
            take_profit_1: None,
            take_profit_2: None,
            position_size_pct: None,
            risk_reward: None,
            rationale: rationale.into(),
            playbook_entries_used: Vec::new(),
            confidence: Confidence::Low,
            error: Some(error.into()),
        }
    }

    /// The `[low, high]` entry bounds, when present and well-formed.
    pub fn entry_bounds(&self) -> Option<(Decimal, Decimal)> {
        match self.entry_zone.as_slice() {
            [low, high] => Some((*low, *high)),
            _ => None,
        }
    }

    /// Semantic validation on top of the serde schema: a neutral plan is
    /// always valid, a directional one needs zone/stop/target present with
    /// bias-consistent ordering (bullish: `sl < low < high < tp`; bearish
    /// mirrored).
    pub fn validate(&self) -> Result<(), SchemaViolation> {
        if self.bias == Bias::Neutral {
            return Ok(());
        }

        let (low, high) = self.entry_bounds().ok_or_else(|| {
            SchemaViolation(format!(
                "{} plan requires entry_zone with exactly two bounds, got {}",
                self.bias,
                self.entry_zone.len()
            ))
        })?;
        if low >= high {
            return Err(SchemaViolation(format!(
                "entry_zone bounds out of order: [{}, {}]",
                low, high
            )));
        }

        let sl = self
            .stop_loss
            .ok_or_else(|| SchemaViolation(format!("{} plan requires stop_loss", self.bias)))?;
        let tp = self.take_profit_1.ok_or_else(|| {
            SchemaViolation(format!("{} plan requires take_profit_1", self.bias))
        })?;

        let consistent = match self.bias {
            Bias::Bullish => sl < low && high < tp,
            Bias::Bearish => tp < low && high < sl,
            Bias::Neutral => unreachable!(),
        };
        if !consistent {
            return Err(SchemaViolation(format!(
                "{} plan has inconsistent levels: sl={} zone=[{}, {}] tp={}",
                self.bias, sl, low, high, tp
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bullish_plan() -> TradingPlan {
        TradingPlan {
            date: NaiveDate::from_ymd_opt(2025, 10, 29).unwrap(),
            bias: Bias::Bullish,
            entry_zone: vec![dec!(1.0840), dec!(1.0850)],
            stop_loss: Some(dec!(1.0820)),
            take_profit_1: Some(dec!(1.0900)),
            take_profit_2: None,
            position_size_pct: Some(dec!(1.0)),
            risk_reward: Some("1:2".to_string()),
            rationale: "test".to_string(),
            playbook_entries_used: vec![],
            confidence: Confidence::Medium,
            error: None,
        }
    }

    #[test]
    fn test_neutral_plan_is_always_valid() {
        let plan = TradingPlan::neutral(
            NaiveDate::from_ymd_opt(2025, 10, 29).unwrap(),
            "no setup",
            "llm transport failure",
        );
        assert!(plan.validate().is_ok());
        assert_eq!(plan.confidence, Confidence::Low);
        assert!(plan.error.is_some());
    }

    #[test]
    fn test_bullish_ordering_accepted() {
        assert!(bullish_plan().validate().is_ok());
    }

    #[test]
    fn test_bullish_stop_above_zone_rejected() {
        let mut plan = bullish_plan();
        plan.stop_loss = Some(dec!(1.0860));
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_bearish_ordering() {
        let mut plan = bullish_plan();
        plan.bias = Bias::Bearish;
        // Bullish levels are inconsistent for a bearish plan.
        assert!(plan.validate().is_err());

        plan.stop_loss = Some(dec!(1.0880));
        plan.take_profit_1 = Some(dec!(1.0800));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_missing_zone_rejected() {
        let mut plan = bullish_plan();
        plan.entry_zone = vec![];
        assert!(plan.validate().is_err());

        plan.entry_zone = vec![dec!(1.0850), dec!(1.0840)];
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_plan_serde_round_trip() {
        let plan = bullish_plan();
        let json = serde_json::to_string_pretty(&plan).unwrap();
        assert!(json.contains("\"bullish\""));
        let back: TradingPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(plan, back);
    }
}
