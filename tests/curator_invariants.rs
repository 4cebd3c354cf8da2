//! Curator update algebra against the store: versioning, history snapshots,
//! and the prune guard, driven through real files.

use acetrade::application::curator::Curator;
use acetrade::config::Paths;
use acetrade::domain::playbook::{Playbook, SECTION_STRATEGIES};
use acetrade::domain::reflection::{
    Insight, InsightKind, Priority, ReflectionReport, ReflectionWindow, SuggestedAction,
    WeeklySummary,
};
use acetrade::infrastructure::PlaybookStore;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

fn now() -> DateTime<Utc> {
    "2025-10-31T18:00:00Z".parse().unwrap()
}

fn empty_summary() -> WeeklySummary {
    WeeklySummary {
        total_trades: 0,
        wins: 0,
        losses: 0,
        no_entries: 0,
        win_rate: 0.0,
        total_pips: Decimal::ZERO,
        avg_win_pips: Decimal::ZERO,
        avg_loss_pips: Decimal::ZERO,
    }
}

fn report(insights: Vec<Insight>) -> ReflectionReport {
    ReflectionReport {
        window: ReflectionWindow::trading_week_containing("2025-10-29".parse().unwrap()),
        summary: empty_summary(),
        insights,
        market_regime_notes: String::new(),
        error: None,
    }
}

fn add_insight(section: &str, content: &str) -> Insight {
    Insight {
        kind: InsightKind::SuccessPattern,
        description: "observed across the week".to_string(),
        evidence_plan_ids: vec!["2025-10-28".to_string()],
        suggested_action: SuggestedAction::AddEntry,
        target_section: Some(section.to_string()),
        target_entry_id: None,
        proposed_content: Some(content.to_string()),
        priority: Priority::High,
    }
}

fn prune_insight(id: &str) -> Insight {
    Insight {
        kind: InsightKind::OutdatedRule,
        description: "kept losing".to_string(),
        evidence_plan_ids: vec![],
        suggested_action: SuggestedAction::Prune,
        target_section: None,
        target_entry_id: Some(id.to_string()),
        proposed_content: None,
        priority: Priority::Medium,
    }
}

/// Spec scenario: v1.3 playbook with a harmful entry; one report adds a new
/// strategy and prunes the bad one, yielding v1.4 with history intact.
#[test]
fn add_and_prune_produce_next_version_with_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = PlaybookStore::new(&Paths::new(dir.path()));

    // Build v1.3 with a poisoned entry.
    let mut playbook = Playbook::seed(now());
    playbook.metadata.version = "1.3".parse().unwrap();
    let doomed = playbook.insert_entry(SECTION_STRATEGIES, "Buy every Monday open.", now());
    playbook.entry_mut(&doomed).unwrap().harmful_count = 4;
    store.save(&playbook).unwrap();

    let curator = Curator::new(3, 2);
    let next = curator
        .apply(
            &playbook,
            &report(vec![
                add_insight(SECTION_STRATEGIES, "Wait for the London open sweep."),
                prune_insight(&doomed),
            ]),
            now(),
        )
        .unwrap();
    store.save(&next).unwrap();

    assert_eq!(next.metadata.version.to_string(), "1.4");
    assert!(next.entry(&doomed).is_none());
    assert_eq!(next.metadata.pruned_entries, vec![doomed]);
    assert!(
        next.entries()
            .any(|e| e.content == "Wait for the London open sweep.")
    );
    assert_eq!(next.metadata.total_entries, next.count_entries());
    assert!(next.validate().is_empty());

    // Both versions exist as immutable snapshots.
    assert!(dir.path().join("data/history/playbook_v1.3.json").exists());
    assert!(dir.path().join("data/history/playbook_v1.4.json").exists());

    // And the current file round-trips to the curated state.
    let loaded = store.load(now()).unwrap();
    assert_eq!(loaded.playbook, next);
}

#[test]
fn version_strictly_increases_and_history_accumulates() {
    let dir = tempfile::tempdir().unwrap();
    let store = PlaybookStore::new(&Paths::new(dir.path()));
    let curator = Curator::new(3, 2);

    let mut playbook = store.load(now()).unwrap().playbook;
    let mut versions = vec![playbook.metadata.version];

    for i in 0..4 {
        let content = format!("Rule learned in week {}.", i);
        playbook = curator
            .apply(&playbook, &report(vec![add_insight(SECTION_STRATEGIES, &content)]), now())
            .unwrap();
        store.save(&playbook).unwrap();

        assert!(playbook.metadata.version > *versions.last().unwrap());
        versions.push(playbook.metadata.version);
    }

    for version in &versions {
        assert!(
            dir.path()
                .join(format!("data/history/playbook_v{}.json", version))
                .exists(),
            "missing snapshot for {}",
            version
        );
    }
}

#[test]
fn prune_guard_and_unknown_targets_never_corrupt_the_playbook() {
    let playbook = Playbook::seed(now());
    let protected = playbook.entries().next().unwrap().id.clone();
    let curator = Curator::new(3, 2);

    let next = curator
        .apply(
            &playbook,
            &report(vec![
                prune_insight(&protected),        // counters are 0/0: guarded
                prune_insight("strat-phantom"),   // unknown: warned, skipped
            ]),
            now(),
        )
        .unwrap();

    assert!(next.entry(&protected).is_some());
    assert!(next.metadata.pruned_entries.is_empty());
    assert!(next.validate().is_empty());
    assert_eq!(next.count_entries(), playbook.count_entries());
}

#[test]
fn duplicate_add_is_idempotent_across_weeks() {
    let curator = Curator::new(3, 2);
    let playbook = Playbook::seed(now());

    let week1 = curator
        .apply(
            &playbook,
            &report(vec![add_insight(SECTION_STRATEGIES, "Respect the daily ATR cap.")]),
            now(),
        )
        .unwrap();
    let week2 = curator
        .apply(
            &week1,
            &report(vec![add_insight(SECTION_STRATEGIES, "Respect the daily ATR cap.")]),
            now(),
        )
        .unwrap();

    assert_eq!(week2.count_entries(), week1.count_entries());
    assert_eq!(week2.metadata.version.to_string(), "1.2");
}
