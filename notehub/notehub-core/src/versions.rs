//! Append-only version store. Each page owns a linear history of immutable
//! snapshots, one JSON file per version under `versions/{pageId}/`, loaded
//! at startup. Nothing here ever mutates a snapshot after it is written.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Block, PageVersion, VersionSummary};

pub struct VersionStore {
    dir: PathBuf,
    // per page, in creation (chronological) order
    by_page: HashMap<Uuid, Vec<PageVersion>>,
}

impl VersionStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut by_page: HashMap<Uuid, Vec<PageVersion>> = HashMap::new();
        for page_dir in fs::read_dir(&dir)? {
            let page_dir = page_dir?;
            if !page_dir.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(page_dir.path())? {
                let entry = entry?;
                let bytes = fs::read(entry.path())?;
                match serde_json::from_slice::<PageVersion>(&bytes) {
                    Ok(version) => by_page.entry(version.page_id).or_default().push(version),
                    Err(err) => {
                        warn!(path = %entry.path().display(), %err, "skipping unreadable version");
                    }
                }
            }
        }
        for versions in by_page.values_mut() {
            versions.sort_by_key(|v| v.created_at);
        }
        Ok(Self { dir, by_page })
    }

    fn version_path(&self, page_id: Uuid, version_id: Uuid) -> PathBuf {
        self.dir.join(page_id.to_string()).join(format!("{version_id}.json"))
    }

    /// Append a snapshot of `(title, blocks)` for `page_id`, stamped now.
    /// The file is durable before the in-memory history is extended, so a
    /// failed write leaves the history unchanged.
    pub fn append(&mut self, page_id: Uuid, title: String, blocks: Vec<Block>) -> Result<Uuid> {
        let version = PageVersion {
            id: Uuid::new_v4(),
            page_id,
            title,
            blocks,
            created_at: Utc::now(),
        };
        fs::create_dir_all(self.dir.join(page_id.to_string()))?;
        let bytes = serde_json::to_vec_pretty(&version)?;
        fs::write(self.version_path(page_id, version.id), bytes)?;
        let id = version.id;
        self.by_page.entry(page_id).or_default().push(version);
        Ok(id)
    }

    /// Roll back a snapshot whose corresponding apply failed. Best effort on
    /// the file; the in-memory entry is always dropped.
    pub fn discard(&mut self, page_id: Uuid, version_id: Uuid) {
        if let Err(err) = fs::remove_file(self.version_path(page_id, version_id)) {
            warn!(%page_id, %version_id, %err, "failed to remove orphaned snapshot file");
        }
        if let Some(versions) = self.by_page.get_mut(&page_id) {
            versions.retain(|v| v.id != version_id);
        }
    }

    /// History summaries, newest first. Blocks are deliberately omitted.
    pub fn list(&self, page_id: Uuid) -> Vec<VersionSummary> {
        self.by_page
            .get(&page_id)
            .map(|versions| {
                versions
                    .iter()
                    .rev()
                    .map(|v| VersionSummary {
                        id: v.id,
                        created_at: v.created_at,
                        title: v.title.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Full snapshot lookup, scoped to one page. A version id belonging to a
    /// different page is simply absent here.
    pub fn get(&self, page_id: Uuid, version_id: Uuid) -> Option<&PageVersion> {
        self.by_page
            .get(&page_id)?
            .iter()
            .find(|v| v.id == version_id)
    }

    pub fn count(&self, page_id: Uuid) -> usize {
        self.by_page.get(&page_id).map(Vec::len).unwrap_or(0)
    }

    /// Cascade: drop a deleted page's entire history.
    pub fn remove_page(&mut self, page_id: Uuid) -> Result<()> {
        let page_dir = self.dir.join(page_id.to_string());
        if page_dir.exists() {
            fs::remove_dir_all(page_dir)?;
        }
        self.by_page.remove(&page_id);
        Ok(())
    }
}
