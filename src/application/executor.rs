use crate::application::simulator::PriceReplaySimulator;
use crate::domain::market::Candle;
use crate::domain::plan::TradingPlan;
use crate::domain::playbook::Playbook;
use crate::domain::trade_log::{
    EntryQuality, EntryVerdict, Execution, ExitTiming, Feedback, FillMethod, Outcome, TradeLog,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Usage updates the executor wants applied to the playbook: `last_used`
/// touches for every cited entry that exists.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybookDelta {
    pub touched_entries: Vec<String>,
    pub at: DateTime<Utc>,
}

impl PlaybookDelta {
    pub fn apply(&self, playbook: &mut Playbook) {
        for id in &self.touched_entries {
            if let Some(entry) = playbook.entry_mut(id) {
                entry.last_used = Some(self.at);
            }
        }
    }
}

/// Deterministic ACE role: replays the plan through the simulator, enriches
/// the result with execution-quality feedback, and emits the playbook usage
/// delta. No LLM involved.
pub struct Executor {
    simulator: Arc<PriceReplaySimulator>,
}

impl Executor {
    pub fn new(simulator: Arc<PriceReplaySimulator>) -> Self {
        Self { simulator }
    }

    pub fn execute(
        &self,
        plan: &TradingPlan,
        session: &[Candle],
        playbook: &Playbook,
        now: DateTime<Utc>,
    ) -> (TradeLog, PlaybookDelta) {
        let execution = self.simulator.simulate(plan, session);
        info!(
            "Executor: {} -> {:?} ({} pips, {:?})",
            plan.date, execution.outcome, execution.pnl_pips, execution.method
        );

        let feedback = build_feedback(plan, &execution, playbook);

        let touched_entries: Vec<String> = plan
            .playbook_entries_used
            .iter()
            .filter(|id| {
                let known = playbook.entry(id).is_some();
                if !known {
                    warn!("Executor: plan cites unknown playbook entry {}, dropping", id);
                }
                known
            })
            .cloned()
            .collect();

        let log = TradeLog {
            plan_id: plan.date,
            execution,
            feedback,
        };
        let delta = PlaybookDelta {
            touched_entries,
            at: now,
        };
        (log, delta)
    }
}

fn build_feedback(plan: &TradingPlan, execution: &Execution, playbook: &Playbook) -> Feedback {
    let mut unexpected_events = Vec::new();
    if execution.method == FillMethod::HashBasedFallback {
        unexpected_events.push(
            "no price data for the session; outcome is a deterministic fallback".to_string(),
        );
    }
    if let Some(error) = &plan.error {
        unexpected_events.push(format!("plan was degraded: {}", error));
    }

    let verdict = match execution.outcome {
        Outcome::Win => EntryVerdict::Helpful,
        Outcome::Loss => EntryVerdict::Harmful,
        Outcome::NoEntry | Outcome::Open => EntryVerdict::Neutral,
    };
    let playbook_entries_feedback: BTreeMap<String, EntryVerdict> = plan
        .playbook_entries_used
        .iter()
        .filter(|id| playbook.entry(id).is_some())
        .map(|id| (id.clone(), verdict))
        .collect();

    Feedback {
        entry_quality: entry_quality(plan, execution),
        exit_timing: exit_timing(execution.outcome),
        unexpected_events,
        playbook_entries_feedback,
    }
}

/// `good` when the fill landed within 20% of the zone midpoint (measured
/// against zone width), `slippage` otherwise.
fn entry_quality(plan: &TradingPlan, execution: &Execution) -> EntryQuality {
    let (Some(entry_price), Some((low, high))) = (execution.entry_price, plan.entry_bounds())
    else {
        return EntryQuality::NotApplicable;
    };
    let width = high - low;
    if width <= Decimal::ZERO {
        return EntryQuality::Good;
    }
    let midpoint = (low + high) / Decimal::TWO;
    let deviation = (entry_price - midpoint).abs();
    let tolerance = width * Decimal::new(2, 1);
    if deviation <= tolerance {
        EntryQuality::Good
    } else {
        EntryQuality::Slippage
    }
}

fn exit_timing(outcome: Outcome) -> Option<ExitTiming> {
    match outcome {
        Outcome::Loss => Some(ExitTiming::StoppedOut),
        Outcome::Win => Some(ExitTiming::TargetHit),
        Outcome::Open => Some(ExitTiming::SessionClose),
        Outcome::NoEntry => None,
    }
}
