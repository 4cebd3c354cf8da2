use crate::domain::playbook::Playbook;
use crate::domain::reflection::{Insight, ReflectionReport, SuggestedAction};
use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Deterministic ACE role: applies a reflection report to the playbook and
/// produces the next version. No LLM involved; given the same playbook and
/// report, the output is identical.
#[derive(Debug, Clone)]
pub struct Curator {
    /// `prune` requires `harmful_count >= min_harmful`...
    min_harmful: u32,
    /// ...and `harmful_count >= helpful_count + harmful_margin`.
    harmful_margin: u32,
}

impl Curator {
    pub fn new(min_harmful: u32, harmful_margin: u32) -> Self {
        Self {
            min_harmful,
            harmful_margin,
        }
    }

    pub fn apply(
        &self,
        playbook: &Playbook,
        report: &ReflectionReport,
        now: DateTime<Utc>,
    ) -> Result<Playbook> {
        let mut next = playbook.clone();
        let mut pruned = Vec::new();

        // High-priority insights first; ties keep the report's order.
        let mut insights: Vec<&Insight> = report.insights.iter().collect();
        insights.sort_by_key(|i| i.priority.rank());

        for insight in insights {
            match insight.suggested_action {
                SuggestedAction::AddEntry => self.add_entry(&mut next, insight, now),
                SuggestedAction::IncrementHelpful => {
                    self.increment(&mut next, insight, true);
                }
                SuggestedAction::IncrementHarmful => {
                    self.increment(&mut next, insight, false);
                }
                SuggestedAction::Prune => {
                    if let Some(id) = self.prune(&mut next, insight) {
                        pruned.push(id);
                    }
                }
            }
        }

        next.metadata.version = next.metadata.version.bump_minor();
        next.metadata.last_updated = now;
        next.metadata.total_entries = next.count_entries();
        next.metadata.pruned_entries = pruned;

        let violations = next.validate();
        if !violations.is_empty() {
            anyhow::bail!(
                "curated playbook failed invariant validation: {}",
                violations.join("; ")
            );
        }

        info!(
            "Curator: {} -> {} ({} entries, {} pruned)",
            playbook.metadata.version,
            next.metadata.version,
            next.metadata.total_entries,
            next.metadata.pruned_entries.len()
        );
        Ok(next)
    }

    fn add_entry(&self, playbook: &mut Playbook, insight: &Insight, now: DateTime<Utc>) {
        let (Some(section), Some(content)) =
            (insight.target_section.as_deref(), insight.proposed_content.as_deref())
        else {
            warn!("Curator: add_entry insight without section/content, skipping");
            return;
        };
        if playbook.contains_content(content) {
            debug!("Curator: duplicate content, skipping add: {}", content);
            return;
        }
        let id = playbook.insert_entry(section, content, now);
        info!("Curator: added {} to {}", id, section);
    }

    fn increment(&self, playbook: &mut Playbook, insight: &Insight, helpful: bool) {
        let Some(id) = insight.target_entry_id.as_deref() else {
            warn!("Curator: increment insight without target_entry_id, skipping");
            return;
        };
        match playbook.entry_mut(id) {
            Some(entry) => {
                if helpful {
                    entry.helpful_count += 1;
                } else {
                    entry.harmful_count += 1;
                }
            }
            None => warn!("Curator: increment targets unknown entry {}, skipping", id),
        }
    }

    /// Prunes only past the guard thresholds; premature deletions are the
    /// most damaging curator mistake.
    fn prune(&self, playbook: &mut Playbook, insight: &Insight) -> Option<String> {
        let id = insight.target_entry_id.as_deref().or_else(|| {
            warn!("Curator: prune insight without target_entry_id, skipping");
            None
        })?;
        let entry = match playbook.entry(id) {
            Some(e) => e,
            None => {
                warn!("Curator: prune targets unknown entry {}, skipping", id);
                return None;
            }
        };

        let eligible = entry.harmful_count >= self.min_harmful
            && entry.harmful_count >= entry.helpful_count + self.harmful_margin;
        if !eligible {
            info!(
                "Curator: prune guard kept {} (helpful {}, harmful {})",
                id, entry.helpful_count, entry.harmful_count
            );
            return None;
        }

        let id = id.to_string();
        playbook.remove_entry(&id);
        info!("Curator: pruned {}", id);
        Some(id)
    }
}
