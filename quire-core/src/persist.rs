//! Durable pane layout and recency log.
//!
//! Only the layout is stored; page content is always refetched from the page
//! store. Snapshots carry a schema version and are repaired on load so that
//! the restored [`WorkspaceState`] satisfies every registry invariant.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::page::PageId;
use crate::pane::{Pane, PaneId, Tab};
use crate::recent::{RecentPageEntry, RecentPages};
use crate::registry::PaneRegistry;
use crate::state::WorkspaceState;

pub const SNAPSHOT_VERSION: u32 = 1;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneSnapshot {
    #[serde(default = "Uuid::new_v4")]
    pub id: PaneId,
    #[serde(default)]
    pub current_page_id: Option<PageId>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub tabs: Vec<Tab>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    /// Absent in layouts written before versioning; read as 0.
    #[serde(default)]
    pub version: u32,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub panes: Vec<PaneSnapshot>,
    #[serde(default)]
    pub active_pane_id: Option<PaneId>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub recent_pages: Vec<RecentPageEntry>,
}

impl WorkspaceSnapshot {
    pub fn capture(state: &WorkspaceState) -> Self {
        let panes = state
            .panes()
            .iter()
            .map(|pane| PaneSnapshot {
                id: pane.id(),
                current_page_id: pane.current_page_id(),
                tabs: pane.tabs().to_vec(),
            })
            .collect();
        Self {
            version: SNAPSHOT_VERSION,
            panes,
            active_pane_id: Some(state.active_pane_id()),
            recent_pages: state.recent().entries().to_vec(),
        }
    }

    /// Migrates and repairs the snapshot into a valid state. Fails only for
    /// snapshots written by a newer schema.
    pub fn restore(self, recent_capacity: usize) -> Result<WorkspaceState> {
        if self.version > SNAPSHOT_VERSION {
            bail!(
                "workspace layout version {} is newer than supported version {}",
                self.version,
                SNAPSHOT_VERSION
            );
        }
        if self.version < SNAPSHOT_VERSION {
            debug!(from = self.version, to = SNAPSHOT_VERSION, "migrating workspace layout");
        }

        let mut seen = std::collections::HashSet::new();
        let panes: Vec<Pane> = self
            .panes
            .into_iter()
            .filter(|p| seen.insert(p.id))
            .map(|p| Pane::from_parts(p.id, p.current_page_id, p.tabs))
            .collect();
        if panes.is_empty() {
            debug!("stored layout had no panes, starting with an empty one");
        }
        let registry = PaneRegistry::from_parts(panes, self.active_pane_id);
        let recent = RecentPages::from_entries(self.recent_pages, recent_capacity);
        Ok(WorkspaceState::from_parts(registry, recent))
    }
}

pub trait WorkspaceStateStore: Send + Sync {
    fn load(&self) -> Result<Option<WorkspaceSnapshot>>;
    fn save(&self, snapshot: &WorkspaceSnapshot) -> Result<()>;
}

/// Loads the stored layout, falling back to a fresh workspace when nothing is
/// stored or the stored data cannot be used.
pub fn load_state(store: &dyn WorkspaceStateStore, recent_capacity: usize) -> WorkspaceState {
    let snapshot = match store.load() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return WorkspaceState::new(recent_capacity),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "discarding unreadable workspace layout");
            return WorkspaceState::new(recent_capacity);
        }
    };
    match snapshot.restore(recent_capacity) {
        Ok(state) => state,
        Err(err) => {
            warn!(error = %err, "discarding workspace layout");
            WorkspaceState::new(recent_capacity)
        }
    }
}

pub struct FileWorkspaceStore {
    path: PathBuf,
}

impl FileWorkspaceStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state directory at {:?}", parent))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl WorkspaceStateStore for FileWorkspaceStore {
    fn load(&self) -> Result<Option<WorkspaceSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open layout file {:?}", self.path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let snapshot = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode layout file {:?}", self.path))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &WorkspaceSnapshot) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(snapshot)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp layout file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryWorkspaceStore {
    inner: Mutex<Option<WorkspaceSnapshot>>,
}

impl MemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<WorkspaceSnapshot> {
        self.inner.lock().clone()
    }
}

impl WorkspaceStateStore for MemoryWorkspaceStore {
    fn load(&self) -> Result<Option<WorkspaceSnapshot>> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, snapshot: &WorkspaceSnapshot) -> Result<()> {
        *self.inner.lock() = Some(snapshot.clone());
        Ok(())
    }
}
