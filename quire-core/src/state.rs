//! Synchronous workspace transitions.
//!
//! [`WorkspaceState::apply`] mutates panes, tabs and the recency log and
//! returns the follow-up work the caller must run. It never blocks and never
//! talks to the page store.

use tracing::{debug, trace};

use crate::page::PageId;
use crate::pane::{Pane, PaneId};
use crate::recent::{RecentPageEntry, RecentPages};
use crate::registry::PaneRegistry;

/// A page to show in a pane, with the title to cache on a new tab.
#[derive(Debug, Clone, PartialEq)]
pub struct TabSeed {
    pub page_id: PageId,
    pub title: String,
}

impl TabSeed {
    pub fn new(page_id: PageId, title: impl Into<String>) -> Self {
        Self {
            page_id,
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenInNewPane { page: Option<TabSeed> },
    OpenInPane { pane_id: PaneId, page: Option<TabSeed> },
    ClosePane { pane_id: PaneId },
    SetActivePane { pane_id: PaneId },
    SplitPane { pane_id: PaneId },
    SelectTab { pane_id: PaneId, page_id: PageId },
    CloseTab { pane_id: PaneId, page_id: PageId },
    CloseOtherTabs { pane_id: PaneId, keep: PageId },
    CloseAllTabs { pane_id: PaneId },
    PinTab { pane_id: PaneId, page_id: PageId },
    UnpinTab { pane_id: PaneId, page_id: PageId },
    UpdateTabTitle { pane_id: PaneId, page_id: PageId, title: String },
    /// A page was renamed in the store; refresh every cached title.
    PageRenamed { page_id: PageId, title: String },
    /// A page left the notebook; close its tabs and optionally forget visits.
    PageRemoved { page_id: PageId, forget_recent: bool },
    RecordVisit(RecentPageEntry),
    ClearRecent,
    ResetPanes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// `page_id` just became the current page of `pane_id`.
    PageActivated { pane_id: PaneId, page_id: PageId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceState {
    registry: PaneRegistry,
    recent: RecentPages,
}

impl WorkspaceState {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            registry: PaneRegistry::new(),
            recent: RecentPages::new(recent_capacity),
        }
    }

    pub fn from_parts(registry: PaneRegistry, recent: RecentPages) -> Self {
        Self { registry, recent }
    }

    pub fn registry(&self) -> &PaneRegistry {
        &self.registry
    }

    pub fn recent(&self) -> &RecentPages {
        &self.recent
    }

    pub fn panes(&self) -> &[Pane] {
        self.registry.panes()
    }

    pub fn active_pane_id(&self) -> PaneId {
        self.registry.active_pane_id()
    }

    pub fn selected_page_id(&self) -> Option<PageId> {
        self.registry.selected_page_id()
    }

    pub fn apply(&mut self, action: Action) -> Vec<Effect> {
        trace!(?action, "apply");
        match action {
            Action::OpenInNewPane { page } => {
                let seed = page.as_ref().map(|s| (s.page_id, s.title.as_str()));
                let pane_id = self.registry.open_in_new_pane(seed);
                page.map(|s| activated(pane_id, s.page_id))
                    .into_iter()
                    .collect()
            }
            Action::OpenInPane { pane_id, page } => {
                let seed = page.as_ref().map(|s| (s.page_id, s.title.as_str()));
                if !self.registry.open_in_pane(pane_id, seed) {
                    debug!(pane = %pane_id, "open in unknown pane ignored");
                    return Vec::new();
                }
                page.map(|s| activated(pane_id, s.page_id))
                    .into_iter()
                    .collect()
            }
            Action::ClosePane { pane_id } => {
                self.registry.close_pane(pane_id);
                Vec::new()
            }
            Action::SetActivePane { pane_id } => {
                self.registry.set_active_pane(pane_id);
                Vec::new()
            }
            Action::SplitPane { pane_id } => self
                .registry
                .split_pane(pane_id)
                .and_then(|id| {
                    let page_id = self.registry.pane(id)?.current_page_id()?;
                    Some(activated(id, page_id))
                })
                .into_iter()
                .collect(),
            Action::SelectTab { pane_id, page_id } => {
                match self.registry.update_pane(pane_id, |p| p.select_tab(page_id)) {
                    Some(true) => vec![activated(pane_id, page_id)],
                    _ => Vec::new(),
                }
            }
            Action::CloseTab { pane_id, page_id } => self.mutate_current(pane_id, |p| {
                p.close_tab(page_id);
            }),
            Action::CloseOtherTabs { pane_id, keep } => self.mutate_current(pane_id, |p| {
                p.close_others(keep);
            }),
            Action::CloseAllTabs { pane_id } => self.mutate_current(pane_id, |p| p.close_all()),
            Action::PinTab { pane_id, page_id } => {
                self.registry.update_pane(pane_id, |p| p.pin(page_id));
                Vec::new()
            }
            Action::UnpinTab { pane_id, page_id } => {
                self.registry.update_pane(pane_id, |p| p.unpin(page_id));
                Vec::new()
            }
            Action::UpdateTabTitle {
                pane_id,
                page_id,
                title,
            } => {
                self.registry
                    .update_pane(pane_id, |p| p.update_title(page_id, &title));
                Vec::new()
            }
            Action::PageRenamed { page_id, title } => {
                self.registry.update_title_everywhere(page_id, &title);
                self.recent.rename(page_id, &title);
                Vec::new()
            }
            Action::PageRemoved {
                page_id,
                forget_recent,
            } => {
                if forget_recent {
                    self.recent.remove(page_id);
                }
                self.registry
                    .close_page_everywhere(page_id)
                    .into_iter()
                    .filter_map(|pane_id| {
                        let current = self.registry.pane(pane_id)?.current_page_id()?;
                        Some(activated(pane_id, current))
                    })
                    .collect()
            }
            Action::RecordVisit(entry) => {
                self.recent.record_visit(entry);
                Vec::new()
            }
            Action::ClearRecent => {
                self.recent.clear();
                Vec::new()
            }
            Action::ResetPanes => {
                self.registry.reset();
                Vec::new()
            }
        }
    }

    /// Runs a tab operation and reports the pane's new current page if it
    /// changed to another page.
    fn mutate_current(&mut self, pane_id: PaneId, f: impl FnOnce(&mut Pane)) -> Vec<Effect> {
        let before = self.registry.pane(pane_id).and_then(|p| p.current_page_id());
        let after = self.registry.update_pane(pane_id, |p| {
            f(p);
            p.current_page_id()
        });
        match after.flatten() {
            Some(page_id) if Some(page_id) != before => vec![activated(pane_id, page_id)],
            _ => Vec::new(),
        }
    }
}

impl Default for WorkspaceState {
    fn default() -> Self {
        Self::from_parts(PaneRegistry::new(), RecentPages::default())
    }
}

fn activated(pane_id: PaneId, page_id: PageId) -> Effect {
    Effect::PageActivated { pane_id, page_id }
}
