use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

pub const SECTION_STRATEGIES: &str = "strategies_and_hard_rules";
pub const SECTION_TEMPLATES: &str = "useful_code_and_templates";
pub const SECTION_PITFALLS: &str = "troubleshooting_and_pitfalls";

/// Dotted `MAJOR.MINOR` playbook version. The curator bumps MINOR on every
/// application; MAJOR changes only on a schema migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PlaybookVersion {
    pub major: u32,
    pub minor: u32,
}

impl PlaybookVersion {
    pub const INITIAL: PlaybookVersion = PlaybookVersion { major: 1, minor: 0 };

    pub fn bump_minor(self) -> Self {
        Self {
            major: self.major,
            minor: self.minor + 1,
        }
    }
}

impl fmt::Display for PlaybookVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PlaybookVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| anyhow::anyhow!("invalid playbook version: {}", s))?;
        Ok(Self {
            major: major.parse()?,
            minor: minor.parse()?,
        })
    }
}

impl Serialize for PlaybookVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PlaybookVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One actionable knowledge item: a strategy, a template, or a pitfall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub content: String,
    pub helpful_count: u32,
    pub harmful_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookMetadata {
    pub version: PlaybookVersion,
    pub last_updated: DateTime<Utc>,
    pub total_entries: usize,
    /// Entry IDs removed by the curator application that produced this version.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pruned_entries: Vec<String>,
}

/// The evolving knowledge base consumed by the generator and mutated by the
/// curator. Section names map to ordered entry lists; the three canonical
/// sections are always present after seeding, additional sections are
/// preserved as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub metadata: PlaybookMetadata,
    pub sections: BTreeMap<String, Vec<Entry>>,
}

impl Playbook {
    /// Initial seed installed on first run or after quarantining a corrupt file.
    pub fn seed(now: DateTime<Utc>) -> Self {
        let mut playbook = Self {
            metadata: PlaybookMetadata {
                version: PlaybookVersion::INITIAL,
                last_updated: now,
                total_entries: 0,
                pruned_entries: Vec::new(),
            },
            sections: BTreeMap::from([
                (SECTION_STRATEGIES.to_string(), Vec::new()),
                (SECTION_TEMPLATES.to_string(), Vec::new()),
                (SECTION_PITFALLS.to_string(), Vec::new()),
            ]),
        };

        playbook.insert_entry(
            SECTION_STRATEGIES,
            "Only take trades in the direction of the Daily trend; skip days where \
             Daily and H4 disagree.",
            now,
        );
        playbook.insert_entry(
            SECTION_STRATEGIES,
            "Risk-reward below 1:1.5 is not worth taking; prefer setups at or above 1:2.",
            now,
        );
        playbook.insert_entry(
            SECTION_TEMPLATES,
            "Entry zone template: place the zone between the H1 key support and the \
             nearest H4 level, never wider than 1x daily ATR.",
            now,
        );
        playbook.insert_entry(
            SECTION_PITFALLS,
            "Avoid entries within 30 minutes of a high-impact economic event; spreads \
             widen and stops get swept.",
            now,
        );

        playbook.metadata.total_entries = playbook.count_entries();
        playbook
    }

    /// Inserts a new entry with a freshly generated unique ID, creating the
    /// section when absent. Returns the new ID.
    pub fn insert_entry(&mut self, section: &str, content: &str, now: DateTime<Utc>) -> String {
        let id = self.generate_entry_id(section, content);
        let entry = Entry {
            id: id.clone(),
            content: content.to_string(),
            helpful_count: 0,
            harmful_count: 0,
            created_at: now,
            last_used: None,
        };
        self.sections.entry(section.to_string()).or_default().push(entry);
        self.metadata.total_entries = self.count_entries();
        id
    }

    /// Removes an entry by ID from whichever section holds it.
    pub fn remove_entry(&mut self, id: &str) -> bool {
        let mut removed = false;
        for entries in self.sections.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                removed = true;
                break;
            }
        }
        if removed {
            self.metadata.total_entries = self.count_entries();
        }
        removed
    }

    pub fn entry(&self, id: &str) -> Option<&Entry> {
        self.sections.values().flatten().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: &str) -> Option<&mut Entry> {
        self.sections.values_mut().flatten().find(|e| e.id == id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.sections.values().flatten()
    }

    pub fn count_entries(&self) -> usize {
        self.sections.values().map(|v| v.len()).sum()
    }

    /// Exact-string duplicate check across the whole playbook.
    pub fn contains_content(&self, content: &str) -> bool {
        self.entries().any(|e| e.content == content)
    }

    /// Checks the structural invariants: unique IDs and an accurate
    /// `total_entries`. Returns the list of violations, empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        let mut seen = HashSet::new();
        for entry in self.entries() {
            if !seen.insert(entry.id.as_str()) {
                violations.push(format!("duplicate entry id: {}", entry.id));
            }
            if entry.id.is_empty() {
                violations.push("entry with empty id".to_string());
            }
        }

        let counted = self.count_entries();
        if self.metadata.total_entries != counted {
            violations.push(format!(
                "total_entries mismatch: metadata says {}, sections hold {}",
                self.metadata.total_entries, counted
            ));
        }

        violations
    }

    /// Section-prefixed ID with a slug token from the content's leading
    /// characters. A numeric suffix guarantees uniqueness on collision.
    fn generate_entry_id(&self, section: &str, content: &str) -> String {
        let prefix = section_prefix(section);
        let token: String = content
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(10)
            .collect::<String>()
            .to_ascii_lowercase();
        let token = if token.is_empty() {
            "entry".to_string()
        } else {
            token
        };

        let base = format!("{}-{}", prefix, token);
        if self.entry(&base).is_none() {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if self.entry(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }
}

fn section_prefix(section: &str) -> &str {
    match section {
        SECTION_STRATEGIES => "strat",
        SECTION_TEMPLATES => "code",
        SECTION_PITFALLS => "pit",
        other => {
            let end = other
                .char_indices()
                .take_while(|(_, c)| c.is_ascii_alphanumeric())
                .map(|(i, c)| i + c.len_utf8())
                .last()
                .unwrap_or(0);
            if end == 0 { "misc" } else { &other[..end.min(4)] }
        }
    }
}
