//! Temp/Cleanup Manager (`spec.md` §4.8) — the leaf dependency of the whole
//! pipeline. Tracks every temporary file a worker creates so it can be
//! reclaimed deterministically, independent of how the worker exits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Category tag for a tracked temp file, per `spec.md` §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TempTag {
    JpegProcessing,
    Compressed,
    Thumbnails,
    MicroThumbs,
    Other,
}

impl TempTag {
    fn dirname(self) -> &'static str {
        match self {
            TempTag::JpegProcessing => "jpeg-processing",
            TempTag::Compressed => "compressed",
            TempTag::Thumbnails => "thumbnails",
            TempTag::MicroThumbs => "micro-thumbs",
            TempTag::Other => "other",
        }
    }

    /// `compressed`/`thumbnails`/`micro-thumbs` are deliberately preserved
    /// past worker exit for gallery display; everything else is reclaimed
    /// on the worker's `finally` path.
    pub fn preserved_past_worker(self) -> bool {
        matches!(
            self,
            TempTag::Compressed | TempTag::Thumbnails | TempTag::MicroThumbs
        )
    }
}

pub type TempId = u64;

struct TempEntry {
    path: PathBuf,
    tag: TempTag,
}

/// Tracked-temp-file registry. The mutex around `entries` is the sole
/// mutual-exclusion point for this shared mutable catalog (`spec.md` §5).
pub struct CleanupManager {
    root: PathBuf,
    next_id: AtomicU64,
    entries: Mutex<HashMap<TempId, TempEntry>>,
}

impl CleanupManager {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Root under the platform cache directory, matching the teacher's
    /// `dirs`-crate idiom for locating a stable per-app home.
    pub fn with_default_root() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("paddocktag")
            .join("tmp");
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<tag>/<prefix>-<uuid v4>.<ext>`, per `spec.md` §4.8.
    pub fn generate_temp_path(&self, prefix: &str, ext: &str, tag: TempTag) -> PathBuf {
        self.root
            .join(tag.dirname())
            .join(format!("{prefix}-{}.{ext}", uuid::Uuid::new_v4()))
    }

    pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn track(&self, path: PathBuf, tag: TempTag) -> TempId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap()
            .insert(id, TempEntry { path, tag });
        id
    }

    pub fn cleanup_file(&self, id: TempId) {
        let entry = self.entries.lock().unwrap().remove(&id);
        if let Some(entry) = entry {
            remove_quietly(&entry.path);
        }
    }

    pub fn cleanup_by_tag(&self, tag: TempTag) {
        let mut entries = self.entries.lock().unwrap();
        let ids: Vec<TempId> = entries
            .iter()
            .filter(|(_, e)| e.tag == tag)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(entry) = entries.remove(&id) {
                remove_quietly(&entry.path);
            }
        }
    }

    /// Reclaim everything not preserved for gallery display — the worker's
    /// `finally` path, per `spec.md` §4.2/§4.8.
    pub fn cleanup_transient(&self) {
        let mut entries = self.entries.lock().unwrap();
        let ids: Vec<TempId> = entries
            .iter()
            .filter(|(_, e)| !e.tag.preserved_past_worker())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(entry) = entries.remove(&id) {
                remove_quietly(&entry.path);
            }
        }
    }

    /// Reclaim every tracked file regardless of tag. Used on graceful
    /// shutdown.
    pub fn cleanup_all(&self) {
        let mut entries = self.entries.lock().unwrap();
        for (_, entry) in entries.drain() {
            remove_quietly(&entry.path);
        }
    }

    /// Recursively clear everything under the temp root, tracked or not.
    /// Run once at application startup.
    pub fn startup_cleanup(&self) {
        if self.root.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.root) {
                tracing::warn!("startup cleanup: failed to clear {:?}: {}", self.root, e);
            }
        }
        for tag in [
            TempTag::JpegProcessing,
            TempTag::Compressed,
            TempTag::Thumbnails,
            TempTag::MicroThumbs,
            TempTag::Other,
        ] {
            let _ = std::fs::create_dir_all(self.root.join(tag.dirname()));
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("cleanup: failed to remove {:?}: {}", path, e);
        }
    }
}
