use crate::config::Paths;
use crate::domain::playbook::Playbook;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Result of a load, carrying the quarantine note when the on-disk file was
/// corrupt and a fresh seed was installed.
#[derive(Debug)]
pub struct LoadedPlaybook {
    pub playbook: Playbook,
    pub quarantined: Option<PathBuf>,
}

/// Persists the playbook as pretty-printed JSON with atomic writes and an
/// immutable per-version snapshot history.
pub struct PlaybookStore {
    playbook_file: PathBuf,
    history_dir: PathBuf,
}

impl PlaybookStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            playbook_file: paths.playbook_file(),
            history_dir: paths.history_dir(),
        }
    }

    /// Loads the current playbook. A missing file seeds a fresh one; a
    /// malformed file is quarantined (renamed with a `.corrupt` suffix), a
    /// fresh seed is installed, and the event is surfaced in the result. The
    /// history is never auto-restored; that call is a human's to make.
    pub fn load(&self, now: DateTime<Utc>) -> Result<LoadedPlaybook> {
        if !self.playbook_file.exists() {
            info!("PlaybookStore: no playbook on disk, seeding a fresh one");
            let playbook = Playbook::seed(now);
            self.save(&playbook)?;
            return Ok(LoadedPlaybook {
                playbook,
                quarantined: None,
            });
        }

        let content = fs::read_to_string(&self.playbook_file)
            .with_context(|| format!("Failed to read {:?}", self.playbook_file))?;

        let parsed: Result<Playbook> = serde_json::from_str::<Playbook>(&content)
            .map_err(anyhow::Error::from)
            .and_then(|p| {
                let violations = p.validate();
                if violations.is_empty() {
                    Ok(p)
                } else {
                    anyhow::bail!("invariant violations: {}", violations.join("; "))
                }
            });

        match parsed {
            Ok(playbook) => Ok(LoadedPlaybook {
                playbook,
                quarantined: None,
            }),
            Err(e) => {
                let quarantine = self
                    .playbook_file
                    .with_extension(format!("json.corrupt.{}", now.format("%Y%m%dT%H%M%S")));
                error!(
                    "PlaybookStore: corrupt playbook ({}), quarantining to {:?} and reseeding",
                    e, quarantine
                );
                fs::rename(&self.playbook_file, &quarantine)
                    .context("Failed to quarantine corrupt playbook")?;
                let playbook = Playbook::seed(now);
                self.save(&playbook)?;
                Ok(LoadedPlaybook {
                    playbook,
                    quarantined: Some(quarantine),
                })
            }
        }
    }

    /// Atomic write (temp + rename). The first save of a new version also
    /// writes the immutable `history/playbook_v{VERSION}.json` snapshot.
    pub fn save(&self, playbook: &Playbook) -> Result<()> {
        let content =
            serde_json::to_string_pretty(playbook).context("Failed to serialize playbook")?;

        write_atomically(&self.playbook_file, &content)?;

        let snapshot = self
            .history_dir
            .join(format!("playbook_v{}.json", playbook.metadata.version));
        if !snapshot.exists() {
            write_atomically(&snapshot, &content)?;
            info!(
                "PlaybookStore: snapshotted version {} to {:?}",
                playbook.metadata.version, snapshot
            );
        }

        Ok(())
    }

    pub fn validate(playbook: &Playbook) -> Vec<String> {
        playbook.validate()
    }
}

pub(crate) fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("No parent directory for {:?}", path))?;
    fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;

    let temp = path.with_extension("tmp");
    fs::write(&temp, content).with_context(|| format!("Failed to write {:?}", temp))?;
    fs::rename(&temp, path).with_context(|| format!("Failed to rename into {:?}", path))?;
    Ok(())
}
