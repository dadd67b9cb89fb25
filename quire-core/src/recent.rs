use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::page::{NotebookId, PageId};

pub const DEFAULT_RECENT_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentPageEntry {
    pub page_id: PageId,
    pub notebook_id: NotebookId,
    pub title: String,
    pub accessed_at: DateTime<Utc>,
}

/// Most-recent-first log of page visits, one entry per page.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentPages {
    entries: Vec<RecentPageEntry>,
    capacity: usize,
}

impl RecentPages {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Rebuilds the log from stored entries, keeping the first entry per page
    /// and cutting the list to `capacity`.
    pub fn from_entries(entries: Vec<RecentPageEntry>, capacity: usize) -> Self {
        let mut seen = HashSet::new();
        let mut entries: Vec<_> = entries
            .into_iter()
            .filter(|e| seen.insert(e.page_id))
            .collect();
        entries.truncate(capacity);
        Self { entries, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record_visit(&mut self, entry: RecentPageEntry) {
        self.entries.retain(|e| e.page_id != entry.page_id);
        self.entries.insert(0, entry);
        self.entries.truncate(self.capacity);
    }

    pub fn list(&self, limit: usize) -> &[RecentPageEntry] {
        &self.entries[..limit.min(self.entries.len())]
    }

    pub fn get(&self, page_id: PageId) -> Option<&RecentPageEntry> {
        self.entries.iter().find(|e| e.page_id == page_id)
    }

    pub fn entries(&self) -> &[RecentPageEntry] {
        &self.entries
    }

    pub fn remove(&mut self, page_id: PageId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.page_id != page_id);
        before != self.entries.len()
    }

    /// Keeps the cached title of a renamed page current.
    pub fn rename(&mut self, page_id: PageId, title: &str) {
        for entry in self.entries.iter_mut().filter(|e| e.page_id == page_id) {
            entry.title = title.to_string();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RecentPages {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}
