use tracing::debug;

use crate::page::PageId;
use crate::pane::{Pane, PaneId};

/// Ordered panes plus the active one.
///
/// The registry always holds at least one pane, `active_pane_id` always names
/// one of them, and `selected_page_id` mirrors the active pane's current page
/// after every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PaneRegistry {
    panes: Vec<Pane>,
    active_pane_id: PaneId,
    selected_page_id: Option<PageId>,
}

impl PaneRegistry {
    pub fn new() -> Self {
        let pane = Pane::new();
        Self {
            active_pane_id: pane.id(),
            panes: vec![pane],
            selected_page_id: None,
        }
    }

    /// Builds a registry from restored panes. An empty list gets one empty
    /// pane; an unknown or missing active id falls back to the first pane.
    pub fn from_parts(panes: Vec<Pane>, active_pane_id: Option<PaneId>) -> Self {
        if panes.is_empty() {
            return Self::new();
        }
        let active_pane_id = active_pane_id
            .filter(|id| panes.iter().any(|p| p.id() == *id))
            .unwrap_or_else(|| panes[0].id());
        let mut registry = Self {
            panes,
            active_pane_id,
            selected_page_id: None,
        };
        registry.resync();
        registry
    }

    pub fn panes(&self) -> &[Pane] {
        &self.panes
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    pub fn pane(&self, pane_id: PaneId) -> Option<&Pane> {
        self.panes.iter().find(|p| p.id() == pane_id)
    }

    fn index_of(&self, pane_id: PaneId) -> Option<usize> {
        self.panes.iter().position(|p| p.id() == pane_id)
    }

    pub fn active_pane_id(&self) -> PaneId {
        self.active_pane_id
    }

    pub fn active_pane(&self) -> Option<&Pane> {
        self.pane(self.active_pane_id)
    }

    pub fn selected_page_id(&self) -> Option<PageId> {
        self.selected_page_id
    }

    pub fn is_active(&self, pane_id: PaneId) -> bool {
        self.active_pane_id == pane_id
    }

    /// Appends a pane, optionally showing one page, and activates it.
    pub fn open_in_new_pane(&mut self, page: Option<(PageId, &str)>) -> PaneId {
        let mut pane = Pane::new();
        if let Some((page_id, title)) = page {
            pane.open_tab(page_id, title);
        }
        let id = pane.id();
        self.panes.push(pane);
        self.active_pane_id = id;
        self.resync();
        debug!(pane = %id, panes = self.panes.len(), "opened pane");
        id
    }

    /// Shows `page` in an existing pane, reusing its tab if present, and
    /// activates the pane. Returns `false` for an unknown pane.
    pub fn open_in_pane(&mut self, pane_id: PaneId, page: Option<(PageId, &str)>) -> bool {
        let Some(index) = self.index_of(pane_id) else {
            return false;
        };
        if let Some((page_id, title)) = page {
            self.panes[index].open_tab(page_id, title);
        }
        self.active_pane_id = pane_id;
        self.resync();
        true
    }

    /// Removes a pane unless it is the last one. If it was active, the pane
    /// that takes its index (or the new last pane) becomes active.
    pub fn close_pane(&mut self, pane_id: PaneId) -> bool {
        if self.panes.len() <= 1 {
            return false;
        }
        let Some(index) = self.index_of(pane_id) else {
            return false;
        };
        self.panes.remove(index);
        if self.active_pane_id == pane_id {
            let next = index.min(self.panes.len() - 1);
            self.active_pane_id = self.panes[next].id();
        }
        self.resync();
        debug!(pane = %pane_id, panes = self.panes.len(), "closed pane");
        true
    }

    pub fn set_active_pane(&mut self, pane_id: PaneId) -> bool {
        if self.index_of(pane_id).is_none() {
            return false;
        }
        self.active_pane_id = pane_id;
        self.resync();
        true
    }

    /// Inserts a pane right after `pane_id` holding a copy of its current tab
    /// only, and activates it.
    pub fn split_pane(&mut self, pane_id: PaneId) -> Option<PaneId> {
        let index = self.index_of(pane_id)?;
        let mut pane = Pane::new();
        if let Some(tab) = self.panes[index].current_tab() {
            pane.open_tab(tab.page_id, &tab.title);
        }
        let id = pane.id();
        self.panes.insert(index + 1, pane);
        self.active_pane_id = id;
        self.resync();
        debug!(source = %pane_id, pane = %id, "split pane");
        Some(id)
    }

    /// Runs a tab operation on one pane and resyncs the selected page.
    pub fn update_pane<R>(&mut self, pane_id: PaneId, f: impl FnOnce(&mut Pane) -> R) -> Option<R> {
        let index = self.index_of(pane_id)?;
        let result = f(&mut self.panes[index]);
        self.resync();
        Some(result)
    }

    /// Rewrites the cached tab title of `page_id` in every pane.
    pub fn update_title_everywhere(&mut self, page_id: PageId, title: &str) -> usize {
        self.panes
            .iter_mut()
            .map(|p| p.update_title(page_id, title))
            .filter(|changed| *changed)
            .count()
    }

    /// Closes the tab of `page_id` in every pane, using the usual successor
    /// rule. Returns the ids of panes whose current page changed.
    pub fn close_page_everywhere(&mut self, page_id: PageId) -> Vec<PaneId> {
        let mut changed = Vec::new();
        for pane in &mut self.panes {
            let was_current = pane.current_page_id() == Some(page_id);
            if pane.close_tab(page_id).is_some() && was_current {
                changed.push(pane.id());
            }
        }
        self.resync();
        changed
    }

    /// Drops every pane and starts over with one empty pane.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn resync(&mut self) {
        self.selected_page_id = self.active_pane().and_then(|p| p.current_page_id());
    }
}

impl Default for PaneRegistry {
    fn default() -> Self {
        Self::new()
    }
}
