use crate::config::Paths;
use crate::domain::playbook::Playbook;
use crate::domain::ports::{BundleHandle, StateBundleStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Index of everything a bundle contains, written on every publish.
#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub playbook: PlaybookDigest,
    pub trading_sessions: Vec<String>,
    pub weekly_reflections: Vec<String>,
    /// Integrity digest of `data/playbook.json`, checked on restore.
    pub playbook_sha256: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaybookDigest {
    pub version: String,
    pub total_entries: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// No prior bundle; the run starts from a clean seed.
    FirstRun,
    Restored {
        key: String,
    },
    /// The latest bundle failed validation; local state is left untouched
    /// and the run proceeds from whatever it has (usually a fresh seed).
    CorruptBundle {
        key: String,
        reason: String,
    },
}

/// Restores the latest complete state bundle before a run and re-publishes
/// the whole tree afterwards. The local filesystem view is a cache; the
/// bundle store is the source of truth across ephemeral runs.
pub struct StateSynchronizer {
    store: Arc<dyn StateBundleStore>,
    paths: Paths,
    retention_days: i64,
    run_token: String,
}

impl StateSynchronizer {
    pub fn new(
        store: Arc<dyn StateBundleStore>,
        paths: Paths,
        retention_days: i64,
        run_token: String,
    ) -> Self {
        Self {
            store,
            paths,
            retention_days,
            run_token,
        }
    }

    pub async fn restore(&self) -> Result<RestoreOutcome> {
        let Some(handle) = self.store.latest().await.context("Bundle lookup failed")? else {
            info!("StateSynchronizer: no prior bundle, first-run semantics");
            return Ok(RestoreOutcome::FirstRun);
        };

        let staging = self.paths.root.with_extension("restore-tmp");
        if staging.exists() {
            fs::remove_dir_all(&staging).context("Failed to clear restore staging dir")?;
        }
        fs::create_dir_all(&staging).context("Failed to create restore staging dir")?;

        self.store
            .download(&handle, &staging)
            .await
            .with_context(|| format!("Failed to download bundle {}", handle.key))?;

        if let Err(reason) = validate_bundle(&staging) {
            error!(
                "StateSynchronizer: bundle {} failed validation: {}",
                handle.key, reason
            );
            let _ = fs::remove_dir_all(&staging);
            return Ok(RestoreOutcome::CorruptBundle {
                key: handle.key,
                reason: reason.to_string(),
            });
        }

        if self.paths.root.exists() {
            fs::remove_dir_all(&self.paths.root).context("Failed to clear local state dir")?;
        }
        fs::rename(&staging, &self.paths.root).context("Failed to move bundle into place")?;

        info!(
            "StateSynchronizer: restored bundle {} ({})",
            handle.key, handle.created_at
        );
        Ok(RestoreOutcome::Restored { key: handle.key })
    }

    /// Uploads the whole local tree as one bundle keyed by time, cycle, and
    /// run token, then prunes bundles past the retention horizon. Must run
    /// only after every session artifact is on disk.
    pub async fn publish(&self, cycle: &str, now: DateTime<Utc>) -> Result<String> {
        self.write_artifact_summary()
            .context("Failed to write artifact summary")?;

        let key = format!(
            "{}-{}-{}",
            now.format("%Y%m%dT%H%M%S"),
            cycle,
            self.run_token
        );
        self.store
            .upload(&self.paths.root, &key, now)
            .await
            .with_context(|| format!("Failed to upload bundle {}", key))?;
        info!("StateSynchronizer: published bundle {}", key);

        let horizon = now - Duration::days(self.retention_days);
        match self.store.prune_older_than(horizon).await {
            Ok(0) => {}
            Ok(n) => info!("StateSynchronizer: pruned {} expired bundles", n),
            Err(e) => warn!("StateSynchronizer: bundle pruning failed: {}", e),
        }

        Ok(key)
    }

    fn write_artifact_summary(&self) -> Result<()> {
        let playbook_raw = fs::read_to_string(self.paths.playbook_file())
            .context("Cannot summarize without data/playbook.json")?;
        let playbook: Playbook =
            serde_json::from_str(&playbook_raw).context("Unparseable playbook")?;

        let summary = ArtifactSummary {
            playbook: PlaybookDigest {
                version: playbook.metadata.version.to_string(),
                total_entries: playbook.metadata.total_entries,
                last_updated: playbook.metadata.last_updated,
            },
            trading_sessions: list_dir_names(&self.paths.session_root()),
            weekly_reflections: list_dir_names(&self.paths.reflections_dir()),
            playbook_sha256: hex::encode(Sha256::digest(playbook_raw.as_bytes())),
        };

        let content = serde_json::to_string_pretty(&summary)?;
        super::playbook_store::write_atomically(&self.paths.artifact_summary_file(), &content)
    }
}

fn validate_bundle(root: &Path) -> Result<()> {
    let paths = Paths::new(root);
    let playbook_raw = fs::read_to_string(paths.playbook_file())
        .context("bundle is missing data/playbook.json")?;
    let playbook: Playbook =
        serde_json::from_str(&playbook_raw).context("bundle playbook is unparseable")?;

    let violations = playbook.validate();
    if !violations.is_empty() {
        anyhow::bail!("bundle playbook violates invariants: {}", violations.join("; "));
    }

    let summary_file = paths.artifact_summary_file();
    if summary_file.exists() {
        let summary: ArtifactSummary =
            serde_json::from_str(&fs::read_to_string(&summary_file)?)
                .context("bundle artifact summary is unparseable")?;
        let digest = hex::encode(Sha256::digest(playbook_raw.as_bytes()));
        if digest != summary.playbook_sha256 {
            anyhow::bail!(
                "playbook digest mismatch: summary says {}, file is {}",
                summary.playbook_sha256,
                digest
            );
        }
    }

    Ok(())
}

fn list_dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Recursive copy used by the filesystem bundle store.
pub(crate) fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {:?}", dest))?;
    for entry in fs::read_dir(src).with_context(|| format!("Failed to read {:?}", src))? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {:?}", entry.path()))?;
        }
    }
    Ok(())
}

/// Bundle store backed by a plain directory, one subdirectory per key with a
/// small metadata file. Stands in for the CI artifact store in local runs
/// and maps 1:1 onto its semantics.
pub struct LocalBundleStore {
    root: std::path::PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct BundleMeta {
    key: String,
    created_at: DateTime<Utc>,
}

impl LocalBundleStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn meta_file(dir: &Path) -> std::path::PathBuf {
        dir.join("bundle.json")
    }

    fn handles(&self) -> Result<Vec<(BundleHandle, std::path::PathBuf)>> {
        let mut handles = Vec::new();
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Ok(handles);
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.file_type()?.is_dir() {
                continue;
            }
            // In-flight uploads are staged under a dot-prefixed name.
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let meta_path = Self::meta_file(&entry.path());
            let Ok(raw) = fs::read_to_string(&meta_path) else {
                continue;
            };
            match serde_json::from_str::<BundleMeta>(&raw) {
                Ok(meta) => handles.push((
                    BundleHandle {
                        key: meta.key,
                        created_at: meta.created_at,
                    },
                    entry.path(),
                )),
                Err(e) => warn!("LocalBundleStore: skipping {:?}: {}", meta_path, e),
            }
        }
        Ok(handles)
    }
}

#[async_trait::async_trait]
impl StateBundleStore for LocalBundleStore {
    async fn latest(&self) -> Result<Option<BundleHandle>> {
        Ok(self
            .handles()?
            .into_iter()
            .map(|(h, _)| h)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key.cmp(&b.key))))
    }

    async fn download(&self, handle: &BundleHandle, dest: &Path) -> Result<()> {
        let src = self.root.join(&handle.key).join("state");
        if !src.exists() {
            anyhow::bail!("bundle {} has no state tree", handle.key);
        }
        copy_dir_recursive(&src, dest)
    }

    async fn upload(&self, src: &Path, key: &str, created_at: DateTime<Utc>) -> Result<()> {
        // Stage then rename so a crashed upload never looks like a bundle.
        let staging = self.root.join(format!(".{}.uploading", key));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        copy_dir_recursive(src, &staging.join("state"))?;
        let meta = BundleMeta {
            key: key.to_string(),
            created_at,
        };
        fs::write(
            Self::meta_file(&staging),
            serde_json::to_string_pretty(&meta)?,
        )?;

        let target = self.root.join(key);
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(&staging, &target)
            .with_context(|| format!("Failed to finalize bundle {}", key))?;
        Ok(())
    }

    async fn prune_older_than(&self, horizon: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for (handle, path) in self.handles()? {
            if handle.created_at < horizon {
                fs::remove_dir_all(&path)
                    .with_context(|| format!("Failed to remove bundle {}", handle.key))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
