use crate::domain::plan::{Bias, TradingPlan};
use crate::domain::reflection::ReflectionReport;
use crate::domain::trade_log::TradeLog;
use std::fmt::Write as _;

/// Human-readable daily message for the notifier sink.
pub fn plan_summary(plan: &TradingPlan, log: Option<&TradeLog>) -> String {
    let mut msg = String::new();
    let _ = writeln!(msg, "Daily plan {} - {}", plan.date, plan.bias);

    if plan.bias == Bias::Neutral {
        let _ = writeln!(msg, "Standing aside. {}", plan.rationale);
    } else {
        if let Some((low, high)) = plan.entry_bounds() {
            let _ = writeln!(msg, "Entry zone: {} - {}", low, high);
        }
        if let (Some(sl), Some(tp)) = (plan.stop_loss, plan.take_profit_1) {
            let _ = writeln!(msg, "Stop: {}  Target: {}", sl, tp);
        }
        let _ = writeln!(msg, "Confidence: {}", plan.confidence);
        if !plan.rationale.is_empty() {
            let _ = writeln!(msg, "Why: {}", plan.rationale);
        }
    }
    if let Some(error) = &plan.error {
        let _ = writeln!(msg, "Degraded: {}", error);
    }

    if let Some(log) = log {
        let _ = writeln!(
            msg,
            "Replay: {:?}, {} pips ({:?})",
            log.execution.outcome, log.execution.pnl_pips, log.execution.method
        );
    }

    let _ = write!(msg, "Research output only, not financial advice.");
    msg
}

/// Human-readable weekly message for the notifier sink.
pub fn report_summary(report: &ReflectionReport) -> String {
    let mut msg = String::new();
    let s = &report.summary;
    let _ = writeln!(
        msg,
        "Weekly reflection {} - {}",
        report.window.start, report.window.end
    );
    let _ = writeln!(
        msg,
        "{} trades: {} wins / {} losses / {} no-entries, win rate {:.0}%, {} pips",
        s.total_trades,
        s.wins,
        s.losses,
        s.no_entries,
        s.win_rate * 100.0,
        s.total_pips
    );
    if report.insights.is_empty() {
        let _ = writeln!(msg, "No playbook updates this week.");
    } else {
        let _ = writeln!(msg, "Playbook updates:");
        for insight in &report.insights {
            let _ = writeln!(
                msg,
                "- [{:?}] {:?}: {}",
                insight.priority, insight.suggested_action, insight.description
            );
        }
    }
    if !report.market_regime_notes.is_empty() {
        let _ = writeln!(msg, "Regime: {}", report.market_regime_notes);
    }
    if let Some(error) = &report.error {
        let _ = writeln!(msg, "Degraded: {}", error);
    }
    let _ = write!(msg, "Research output only, not financial advice.");
    msg
}
