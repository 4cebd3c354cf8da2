use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading-week window (Monday through Friday) a reflection covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReflectionWindow {
    /// The trading week containing `date`. Weekend invocations fall back to
    /// the week that just completed, so both cases reduce to "the Monday of
    /// the current calendar week".
    pub fn trading_week_containing(date: NaiveDate) -> Self {
        let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
        Self {
            start: monday,
            end: monday + Duration::days(4),
        }
    }

    pub fn trading_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..=(self.end - self.start).num_days()).map(|d| self.start + Duration::days(d))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeeklySummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub no_entries: usize,
    pub win_rate: f64,
    pub total_pips: Decimal,
    pub avg_win_pips: Decimal,
    pub avg_loss_pips: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    SuccessPattern,
    FailurePattern,
    OutdatedRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    AddEntry,
    IncrementHelpful,
    IncrementHarmful,
    Prune,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Rank for the curator's application order, high first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// One proposed playbook update from the reflector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub description: String,
    #[serde(default)]
    pub evidence_plan_ids: Vec<String>,
    pub suggested_action: SuggestedAction,
    #[serde(default)]
    pub target_section: Option<String>,
    #[serde(default)]
    pub target_entry_id: Option<String>,
    #[serde(default)]
    pub proposed_content: Option<String>,
    pub priority: Priority,
}

impl Insight {
    /// Action/target consistency check; inconsistent insights are dropped
    /// before they reach the curator.
    pub fn is_actionable(&self) -> bool {
        match self.suggested_action {
            SuggestedAction::AddEntry => {
                self.target_section.is_some()
                    && self
                        .proposed_content
                        .as_deref()
                        .is_some_and(|c| !c.trim().is_empty())
            }
            SuggestedAction::IncrementHelpful
            | SuggestedAction::IncrementHarmful
            | SuggestedAction::Prune => self.target_entry_id.is_some(),
        }
    }
}

/// The reflector's weekly output and the curator's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionReport {
    pub window: ReflectionWindow,
    pub summary: WeeklySummary,
    pub insights: Vec<Insight>,
    pub market_regime_notes: String,
    /// Set when the reflection degraded; the curator skips such reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReflectionReport {
    /// Degraded empty-insights report; keeps the weekly artifact schema-valid.
    pub fn empty(window: ReflectionWindow, summary: WeeklySummary, error: impl Into<String>) -> Self {
        Self {
            window,
            summary,
            insights: Vec::new(),
            market_regime_notes: String::new(),
            error: Some(error.into()),
        }
    }
}
