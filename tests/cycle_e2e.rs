//! Full daily and weekly cycles against mock collaborators and a real
//! filesystem state tree.

use acetrade::application::curator::Curator;
use acetrade::application::daily_cycle::{CycleDeps, DailyCycle};
use acetrade::application::weekly_cycle::WeeklyCycle;
use acetrade::config::Paths;
use acetrade::domain::market::SessionWindow;
use acetrade::domain::plan::Bias;
use acetrade::domain::playbook::Playbook;
use acetrade::domain::ports::{
    BundleHandle, GenerationConfig, LlmResponse, StateBundleStore,
};
use acetrade::infrastructure::mock::{
    InMemoryBundleStore, MockLlmClient, MockMarketDataProvider, MockNotifier,
};
use acetrade::infrastructure::state_sync::StateSynchronizer;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;

const WEDNESDAY: &str = "2025-10-29T16:00:00Z";

const PLAN_JSON: &str = r#"{
  "date": "2025-10-29",
  "bias": "bullish",
  "entry_zone": [1.0840, 1.0850],
  "stop_loss": 1.0820,
  "take_profit_1": 1.0900,
  "take_profit_2": null,
  "position_size_pct": 1.0,
  "risk_reward": "1:2.75",
  "rationale": "Pullback into support within the daily uptrend.",
  "playbook_entries_used": ["strat-onlytaketr"],
  "confidence": "high"
}"#;

const REFLECTION_JSON: &str = r#"{
  "insights": [
    {
      "kind": "success_pattern",
      "description": "Plans aligned with the daily trend performed well.",
      "evidence_plan_ids": ["2025-10-29"],
      "suggested_action": "add_entry",
      "target_section": "strategies_and_hard_rules",
      "proposed_content": "Prefer pullback entries over breakout chases in trending weeks.",
      "priority": "high"
    }
  ],
  "market_regime_notes": "Steady dollar-down drift all week."
}"#;

struct Harness {
    deps: Arc<CycleDeps>,
    sync: Arc<StateSynchronizer>,
    llm: Arc<MockLlmClient>,
    notifier: Arc<MockNotifier>,
    bundles: Arc<InMemoryBundleStore>,
    paths: Paths,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path().join("state"));

    let llm = Arc::new(MockLlmClient::new());
    let notifier = Arc::new(MockNotifier::new());
    let bundles = Arc::new(InMemoryBundleStore::new());

    let sync = Arc::new(StateSynchronizer::new(
        bundles.clone(),
        paths.clone(),
        14,
        "test-run".to_string(),
    ));

    let deps = Arc::new(CycleDeps {
        market_data: Arc::new(MockMarketDataProvider::new(
            "EURUSD".to_string(),
            dec!(1.0845),
        )),
        llm: llm.clone(),
        notifier: notifier.clone(),
        generation: GenerationConfig::default(),
        paths: paths.clone(),
        session_window: SessionWindow::default(),
        pip_scale: dec!(10000),
    });

    Harness {
        deps,
        sync,
        llm,
        notifier,
        bundles,
        paths,
        _dir: dir,
    }
}

fn now() -> DateTime<Utc> {
    WEDNESDAY.parse().unwrap()
}

#[tokio::test]
async fn fresh_start_daily_cycle_seeds_plays_and_publishes() {
    let h = harness();
    h.llm.push_response(LlmResponse::completed(PLAN_JSON, "STOP"));

    let outcome = DailyCycle::new(h.deps.clone(), h.sync.clone())
        .run(now())
        .await
        .unwrap();

    // A seeded playbook with at least three default entries, version 1.0.
    let playbook: Playbook = serde_json::from_str(
        &std::fs::read_to_string(h.paths.playbook_file()).unwrap(),
    )
    .unwrap();
    assert_eq!(playbook.metadata.version.to_string(), "1.0");
    assert!(playbook.metadata.total_entries >= 3);

    // Plan parsed from the model, keyed to the session date.
    assert_eq!(outcome.plan.bias, Bias::Bullish);
    assert_eq!(outcome.plan.date.to_string(), "2025-10-29");

    // Session artifacts on disk before publish.
    assert!(h.paths.plan_file(outcome.plan.date).exists());
    assert!(h.paths.trade_log_file(outcome.plan.date).exists());

    // The cited entry's last_used was touched.
    assert!(
        playbook
            .entry("strat-onlytaketr")
            .unwrap()
            .last_used
            .is_some()
    );

    // One bundle published, containing the playbook.
    let handle = h.bundles.latest().await.unwrap().expect("bundle published");
    assert_eq!(handle.key, outcome.bundle_key);
    let restore_dir = tempfile::tempdir().unwrap();
    h.bundles.download(&handle, restore_dir.path()).await.unwrap();
    let bundled: Playbook = serde_json::from_str(
        &std::fs::read_to_string(restore_dir.path().join("data/playbook.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(bundled.metadata.version.to_string(), "1.0");
    assert!(restore_dir.path().join("artifact_summary.json").exists());

    // The notifier saw the plan before the replay result existed.
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("bullish"));
    assert!(sent[0].contains("not financial advice"));
}

#[tokio::test]
async fn degraded_llm_still_completes_the_day() {
    let h = harness();
    // Queue empty and no canned fallback: the generator sees a transport
    // error and must stand aside rather than abort.
    let outcome = DailyCycle::new(h.deps.clone(), h.sync.clone())
        .run(now())
        .await
        .unwrap();

    assert_eq!(outcome.plan.bias, Bias::Neutral);
    assert!(outcome.plan.error.is_some());
    assert!(h.paths.trade_log_file(outcome.plan.date).exists());
    assert!(h.bundles.latest().await.unwrap().is_some());
}

#[tokio::test]
async fn weekly_cycle_reflects_curates_and_versions() {
    let h = harness();
    // Call 1: generator (embedded daily). Call 2: reflector.
    h.llm.push_response(LlmResponse::completed(PLAN_JSON, "STOP"));
    h.llm
        .push_response(LlmResponse::completed(REFLECTION_JSON, "STOP"));

    let curator = Curator::new(3, 2);
    let outcome = WeeklyCycle::new(h.deps.clone(), h.sync.clone(), curator, 5)
        .run(now())
        .await
        .unwrap();

    assert!(outcome.curated);
    assert_eq!(outcome.report.insights.len(), 1);
    assert_eq!(outcome.report.summary.total_trades, 1);

    // The reflection artifact exists under the ISO-week key.
    assert!(
        h.paths
            .reflections_dir()
            .join("2025_W44_reflection.json")
            .exists()
    );

    // The curator produced v1.1 with the proposed entry, and history holds
    // both versions.
    let playbook: Playbook = serde_json::from_str(
        &std::fs::read_to_string(h.paths.playbook_file()).unwrap(),
    )
    .unwrap();
    assert_eq!(playbook.metadata.version.to_string(), "1.1");
    assert!(
        playbook
            .entries()
            .any(|e| e.content.contains("pullback entries"))
    );
    assert!(h.paths.history_snapshot_file("1.0").exists());
    assert!(h.paths.history_snapshot_file("1.1").exists());

    // Two bundles: the embedded daily publish and the weekly one.
    assert_eq!(h.bundles.keys().len(), 2);

    // Two notifications: plan and weekly report.
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].contains("Weekly reflection"));
}

#[tokio::test]
async fn weekly_with_degraded_reflection_skips_curation() {
    let h = harness();
    h.llm.push_response(LlmResponse::completed(PLAN_JSON, "STOP"));
    h.llm
        .push_response(LlmResponse::completed("not json at all", "STOP"));

    let curator = Curator::new(3, 2);
    let outcome = WeeklyCycle::new(h.deps.clone(), h.sync.clone(), curator, 5)
        .run(now())
        .await
        .unwrap();

    assert!(!outcome.curated);
    assert!(outcome.report.error.is_some());
    assert!(outcome.report.insights.is_empty());

    // Playbook version unchanged; the degraded report is still persisted.
    let playbook: Playbook = serde_json::from_str(
        &std::fs::read_to_string(h.paths.playbook_file()).unwrap(),
    )
    .unwrap();
    assert_eq!(playbook.metadata.version.to_string(), "1.0");
    assert!(
        h.paths
            .reflections_dir()
            .join("2025_W44_reflection.json")
            .exists()
    );
}

#[tokio::test]
async fn second_run_restores_published_state() {
    let h = harness();
    h.llm.push_response(LlmResponse::completed(PLAN_JSON, "STOP"));
    DailyCycle::new(h.deps.clone(), h.sync.clone())
        .run(now())
        .await
        .unwrap();

    // Wipe the local tree: the next run must restore it from the bundle.
    std::fs::remove_dir_all(&h.paths.root).unwrap();
    h.llm.push_response(LlmResponse::completed(PLAN_JSON, "STOP"));

    let next_day: DateTime<Utc> = "2025-10-30T16:00:00Z".parse().unwrap();
    let outcome = DailyCycle::new(h.deps.clone(), h.sync.clone())
        .run(next_day)
        .await
        .unwrap();
    assert!(outcome.events.is_empty(), "events: {:?}", outcome.events);

    // Yesterday's artifacts came back along with today's.
    assert!(h.paths.plan_file("2025-10-29".parse().unwrap()).exists());
    assert!(h.paths.plan_file("2025-10-30".parse().unwrap()).exists());
}

struct RejectingStore;

#[async_trait]
impl StateBundleStore for RejectingStore {
    async fn latest(&self) -> Result<Option<BundleHandle>> {
        Ok(None)
    }
    async fn download(&self, _handle: &BundleHandle, _dest: &Path) -> Result<()> {
        anyhow::bail!("unreachable in this test")
    }
    async fn upload(&self, _src: &Path, _key: &str, _created_at: DateTime<Utc>) -> Result<()> {
        anyhow::bail!("storage quota exceeded")
    }
    async fn prune_older_than(&self, _horizon: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }
}

#[tokio::test]
async fn publish_failure_is_fatal() {
    let h = harness();
    let failing_sync = Arc::new(StateSynchronizer::new(
        Arc::new(RejectingStore),
        h.paths.clone(),
        14,
        "test-run".to_string(),
    ));
    h.llm.push_response(LlmResponse::completed(PLAN_JSON, "STOP"));

    let result = DailyCycle::new(h.deps.clone(), failing_sync).run(now()).await;

    let err = result.expect_err("publish failure must abort the cycle");
    assert!(err.to_string().contains("publish"));

    // Local artifacts were still written before the failed publish; the next
    // run resumes from the last good bundle.
    assert!(h.paths.playbook_file().exists());
}
