use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::page::PageId;

pub type PaneId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub page_id: PageId,
    pub title: String,
    #[serde(default)]
    pub is_pinned: bool,
}

impl Tab {
    pub fn new(page_id: PageId, title: impl Into<String>) -> Self {
        Self {
            page_id,
            title: title.into(),
            is_pinned: false,
        }
    }
}

/// One viewport with its own tab strip.
///
/// Invariants kept by every method: no two tabs share a `page_id`, and
/// `current_page_id`, when set, names one of the tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pane {
    id: PaneId,
    current_page_id: Option<PageId>,
    tabs: Vec<Tab>,
}

impl Pane {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: PaneId) -> Self {
        Self {
            id,
            current_page_id: None,
            tabs: Vec::new(),
        }
    }

    /// Builds a pane from stored parts, restoring the invariants: duplicate
    /// tabs collapse onto the first one, and a missing or dangling current
    /// page falls back to the first tab.
    pub fn from_parts(id: PaneId, current_page_id: Option<PageId>, tabs: Vec<Tab>) -> Self {
        let mut pane = Self::with_id(id);
        for tab in tabs {
            if pane.tab(tab.page_id).is_none() {
                pane.tabs.push(tab);
            }
        }
        pane.current_page_id = current_page_id
            .filter(|id| pane.tab(*id).is_some())
            .or_else(|| pane.tabs.first().map(|t| t.page_id));
        pane
    }

    pub fn id(&self) -> PaneId {
        self.id
    }

    pub fn current_page_id(&self) -> Option<PageId> {
        self.current_page_id
    }

    pub fn current_tab(&self) -> Option<&Tab> {
        self.current_page_id.and_then(|id| self.tab(id))
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn tab(&self, page_id: PageId) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.page_id == page_id)
    }

    fn position(&self, page_id: PageId) -> Option<usize> {
        self.tabs.iter().position(|t| t.page_id == page_id)
    }

    /// Activates the tab for `page_id`, appending it first if absent. An
    /// existing tab keeps its title.
    pub fn open_tab(&mut self, page_id: PageId, title: &str) {
        if self.tab(page_id).is_none() {
            self.tabs.push(Tab::new(page_id, title));
        }
        self.current_page_id = Some(page_id);
    }

    /// Makes an existing tab current. Returns `false` if there is no such tab.
    pub fn select_tab(&mut self, page_id: PageId) -> bool {
        if self.tab(page_id).is_none() {
            return false;
        }
        self.current_page_id = Some(page_id);
        true
    }

    /// Removes a tab. When it was current, the tab that slides into its index
    /// becomes current, or the new last tab if it was at the end.
    pub fn close_tab(&mut self, page_id: PageId) -> Option<Tab> {
        let index = self.position(page_id)?;
        let removed = self.tabs.remove(index);
        if self.current_page_id == Some(page_id) {
            self.current_page_id = if self.tabs.is_empty() {
                None
            } else if index >= self.tabs.len() {
                self.tabs.last().map(|t| t.page_id)
            } else {
                Some(self.tabs[index].page_id)
            };
        }
        Some(removed)
    }

    /// Closes every tab except `keep` and the pinned ones.
    pub fn close_others(&mut self, keep: PageId) -> bool {
        if self.tab(keep).is_none() {
            return false;
        }
        self.tabs.retain(|t| t.page_id == keep || t.is_pinned);
        self.current_page_id = Some(keep);
        true
    }

    /// Closes every unpinned tab. The first pinned tab, if any, becomes current.
    pub fn close_all(&mut self) {
        self.tabs.retain(|t| t.is_pinned);
        self.current_page_id = self.tabs.first().map(|t| t.page_id);
    }

    /// Pins a tab and moves it to the end of the pinned block at the front.
    pub fn pin(&mut self, page_id: PageId) -> bool {
        let Some(index) = self.position(page_id) else {
            return false;
        };
        if self.tabs[index].is_pinned {
            return true;
        }
        let mut tab = self.tabs.remove(index);
        tab.is_pinned = true;
        let insert_at = self.tabs.iter().take_while(|t| t.is_pinned).count();
        self.tabs.insert(insert_at, tab);
        true
    }

    pub fn unpin(&mut self, page_id: PageId) -> bool {
        match self.tabs.iter_mut().find(|t| t.page_id == page_id) {
            Some(tab) => {
                tab.is_pinned = false;
                true
            }
            None => false,
        }
    }

    pub fn update_title(&mut self, page_id: PageId, title: &str) -> bool {
        match self.tabs.iter_mut().find(|t| t.page_id == page_id) {
            Some(tab) => {
                tab.title = title.to_string();
                true
            }
            None => false,
        }
    }
}

impl Default for Pane {
    fn default() -> Self {
        Self::new()
    }
}
