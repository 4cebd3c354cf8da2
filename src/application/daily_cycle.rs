use crate::application::executor::Executor;
use crate::application::generator::Generator;
use crate::application::robust_json::RobustJsonDecoder;
use crate::application::simulator::PriceReplaySimulator;
use crate::application::summaries::plan_summary;
use crate::config::Paths;
use crate::domain::errors::StateError;
use crate::domain::market::SessionWindow;
use crate::domain::plan::TradingPlan;
use crate::domain::ports::{GenerationConfig, LlmClient, MarketDataProvider, Notifier};
use crate::domain::trade_log::TradeLog;
use crate::infrastructure::playbook_store::{PlaybookStore, write_atomically};
use crate::infrastructure::state_sync::{RestoreOutcome, StateSynchronizer};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// A non-fatal stage failure, recorded instead of aborting the cycle.
#[derive(Debug, Clone)]
pub struct CycleEvent {
    pub stage: &'static str,
    pub detail: String,
}

#[derive(Debug)]
pub struct DailyOutcome {
    pub plan: TradingPlan,
    pub log: TradeLog,
    pub bundle_key: String,
    pub events: Vec<CycleEvent>,
}

/// Shared collaborators for both cycles.
pub struct CycleDeps {
    pub market_data: Arc<dyn MarketDataProvider>,
    pub llm: Arc<dyn LlmClient>,
    pub notifier: Arc<dyn Notifier>,
    pub generation: GenerationConfig,
    pub paths: Paths,
    pub session_window: SessionWindow,
    pub pip_scale: Decimal,
}

/// The daily pipeline: restore -> load -> generate -> notify -> replay ->
/// persist -> publish. Every stage degrades on failure except state
/// persistence and publish, which are fatal to preserve the cross-run
/// guarantees.
pub struct DailyCycle {
    deps: Arc<CycleDeps>,
    store: PlaybookStore,
    sync: Arc<StateSynchronizer>,
}

impl DailyCycle {
    pub fn new(deps: Arc<CycleDeps>, sync: Arc<StateSynchronizer>) -> Self {
        let store = PlaybookStore::new(&deps.paths);
        Self { deps, store, sync }
    }

    #[instrument(skip(self), fields(day = %now.date_naive()))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<DailyOutcome> {
        let mut events = Vec::new();

        // 1. Restore the latest bundle; a failed restore degrades to local
        //    state (a fresh seed on a blank machine).
        match self.sync.restore().await {
            Ok(RestoreOutcome::Restored { key }) => {
                info!("DailyCycle: state restored from {}", key)
            }
            Ok(RestoreOutcome::FirstRun) => info!("DailyCycle: first run, starting clean"),
            Ok(RestoreOutcome::CorruptBundle { key, reason }) => {
                record(&mut events, "restore", format!("bundle {} corrupt: {}", key, reason));
            }
            Err(e) => record(&mut events, "restore", format!("restore failed: {:#}", e)),
        }

        // 2. Load (or seed) the playbook.
        let loaded = self.store.load(now).context("Playbook load failed")?;
        let mut playbook = loaded.playbook;
        if let Some(quarantined) = loaded.quarantined {
            record(
                &mut events,
                "playbook_load",
                format!("corrupt playbook quarantined to {:?}", quarantined),
            );
        }

        // 3. Market snapshot, then the generator's single LLM call.
        let plan = match self.deps.market_data.fetch_snapshot(now).await {
            Ok(snapshot) => {
                let decoder = RobustJsonDecoder::with_debug_dir(
                    self.deps.paths.debug_dir(now.date_naive()),
                );
                Generator::new(self.deps.llm.clone(), decoder, self.deps.generation.clone())
                    .generate(&playbook, &snapshot)
                    .await
            }
            Err(e) => {
                record(&mut events, "snapshot", format!("market data failed: {:#}", e));
                TradingPlan::neutral(
                    now.date_naive(),
                    "market data unavailable, standing aside",
                    format!("upstream unavailable: {:#}", e),
                )
            }
        };

        // 4. Announce the plan before the session replays.
        if let Err(e) = self.deps.notifier.send(&plan_summary(&plan, None)).await {
            record(&mut events, "notify_plan", format!("notifier failed: {:#}", e));
        }

        // 5. Session OHLC; an upstream failure leaves the simulator on its
        //    deterministic fallback path.
        let session = match self
            .deps
            .market_data
            .fetch_session_ohlc(plan.date, &self.deps.session_window)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                record(&mut events, "session_ohlc", format!("ohlc fetch failed: {:#}", e));
                Vec::new()
            }
        };

        // 6. Replay and apply usage counters.
        let executor = Executor::new(Arc::new(PriceReplaySimulator::new(self.deps.pip_scale)));
        let (log, delta) = executor.execute(&plan, &session, &playbook, now);
        delta.apply(&mut playbook);

        // 7. State persistence is fatal from here on.
        self.store.save(&playbook).context("Playbook save failed")?;
        self.persist_session_artifacts(&plan, &log)
            .context("Session artifact save failed")?;

        // 8. Publish after everything is on disk; a failed publish is the
        //    only error that short-circuits with a non-zero outcome.
        let bundle_key = self.sync.publish("daily", now).await.map_err(|e| {
            error!("DailyCycle: publish failed: {:#}", e);
            StateError::PublishFailed {
                reason: format!("{:#}", e),
            }
        })?;

        for event in &events {
            warn!("DailyCycle: degraded stage {}: {}", event.stage, event.detail);
        }

        Ok(DailyOutcome {
            plan,
            log,
            bundle_key,
            events,
        })
    }

    fn persist_session_artifacts(&self, plan: &TradingPlan, log: &TradeLog) -> Result<()> {
        write_atomically(
            &self.deps.paths.plan_file(plan.date),
            &serde_json::to_string_pretty(plan)?,
        )?;
        write_atomically(
            &self.deps.paths.trade_log_file(plan.date),
            &serde_json::to_string_pretty(log)?,
        )?;
        Ok(())
    }
}

pub(crate) fn record(events: &mut Vec<CycleEvent>, stage: &'static str, detail: String) {
    warn!("{}: {}", stage, detail);
    events.push(CycleEvent { stage, detail });
}
