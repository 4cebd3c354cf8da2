use crate::application::curator::Curator;
use crate::application::daily_cycle::{CycleDeps, CycleEvent, DailyCycle, record};
use crate::application::reflector::Reflector;
use crate::application::robust_json::RobustJsonDecoder;
use crate::application::summaries::report_summary;
use crate::domain::errors::StateError;
use crate::domain::plan::TradingPlan;
use crate::domain::reflection::{ReflectionReport, ReflectionWindow};
use crate::domain::trade_log::TradeLog;
use crate::infrastructure::playbook_store::{PlaybookStore, write_atomically};
use crate::infrastructure::state_sync::StateSynchronizer;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[derive(Debug)]
pub struct WeeklyOutcome {
    pub report: ReflectionReport,
    pub curated: bool,
    pub bundle_key: String,
    pub events: Vec<CycleEvent>,
}

/// The weekly pipeline: run the daily cycle if today's is missing, then
/// reflect over the completed trading week and let the curator evolve the
/// playbook into its next version.
pub struct WeeklyCycle {
    deps: Arc<CycleDeps>,
    store: PlaybookStore,
    sync: Arc<StateSynchronizer>,
    curator: Curator,
    max_insights: usize,
}

impl WeeklyCycle {
    pub fn new(
        deps: Arc<CycleDeps>,
        sync: Arc<StateSynchronizer>,
        curator: Curator,
        max_insights: usize,
    ) -> Self {
        let store = PlaybookStore::new(&deps.paths);
        Self {
            deps,
            store,
            sync,
            curator,
            max_insights,
        }
    }

    #[instrument(skip(self), fields(day = %now.date_naive()))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<WeeklyOutcome> {
        let mut events = Vec::new();

        // 1. Make sure today's daily cycle ran (it also restores state).
        if self.deps.paths.plan_file(now.date_naive()).exists() {
            info!("WeeklyCycle: today's session already recorded");
        } else {
            let daily = DailyCycle::new(self.deps.clone(), self.sync.clone());
            let outcome = daily.run(now).await.context("Embedded daily cycle failed")?;
            events.extend(outcome.events);
        }

        // 2. Collect the completed week's artifacts.
        let window = ReflectionWindow::trading_week_containing(now.date_naive());
        let week = self.load_week(window, &mut events);
        info!(
            "WeeklyCycle: reflecting over {} sessions in {} - {}",
            week.len(),
            window.start,
            window.end
        );

        // 3. Reflect (single LLM call, degrades to an empty report).
        let decoder =
            RobustJsonDecoder::with_debug_dir(self.deps.paths.debug_dir(now.date_naive()));
        let reflector = Reflector::new(
            self.deps.llm.clone(),
            decoder,
            self.deps.generation.clone(),
            self.max_insights,
        );
        let report = reflector.reflect(window, &week, now).await;

        // 4. Persist the report; state persistence is fatal.
        write_atomically(
            &self.deps.paths.reflection_file(window.start),
            &serde_json::to_string_pretty(&report)?,
        )
        .context("Reflection report save failed")?;

        // 5. Curate. A degraded report means no curation this period; the
        //    executor's usage updates are already in the saved playbook.
        let curated = if report.error.is_some() {
            info!("WeeklyCycle: reflection degraded, curator is a no-op this period");
            false
        } else {
            let playbook = self.store.load(now).context("Playbook load failed")?.playbook;
            match self.curator.apply(&playbook, &report, now) {
                Ok(next) => {
                    self.store.save(&next).context("Playbook save failed")?;
                    true
                }
                Err(e) => {
                    record(&mut events, "curator", format!("curation failed: {:#}", e));
                    false
                }
            }
        };

        // 6. Announce, then publish (fatal on failure).
        if let Err(e) = self.deps.notifier.send(&report_summary(&report)).await {
            record(&mut events, "notify_report", format!("notifier failed: {:#}", e));
        }

        let bundle_key = self.sync.publish("weekly", now).await.map_err(|e| {
            error!("WeeklyCycle: publish failed: {:#}", e);
            StateError::PublishFailed {
                reason: format!("{:#}", e),
            }
        })?;

        for event in &events {
            warn!("WeeklyCycle: degraded stage {}: {}", event.stage, event.detail);
        }

        Ok(WeeklyOutcome {
            report,
            curated,
            bundle_key,
            events,
        })
    }

    /// Loads the plan/log pair of every trading day in the window; days
    /// without artifacts (holidays, failed runs) are skipped.
    fn load_week(
        &self,
        window: ReflectionWindow,
        events: &mut Vec<CycleEvent>,
    ) -> Vec<(TradingPlan, TradeLog)> {
        let mut week = Vec::new();
        for day in window.trading_days() {
            let plan_file = self.deps.paths.plan_file(day);
            let log_file = self.deps.paths.trade_log_file(day);
            if !plan_file.exists() || !log_file.exists() {
                continue;
            }
            let pair = (|| -> Result<(TradingPlan, TradeLog)> {
                let plan = serde_json::from_str(&fs::read_to_string(&plan_file)?)?;
                let log = serde_json::from_str(&fs::read_to_string(&log_file)?)?;
                Ok((plan, log))
            })();
            match pair {
                Ok(pair) => week.push(pair),
                Err(e) => record(
                    events,
                    "load_week",
                    format!("unreadable session artifacts for {}: {:#}", day, e),
                ),
            }
        }
        week
    }
}
