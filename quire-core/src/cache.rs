//! Local mirror of page records plus the freshness bookkeeping for background
//! refreshes.

use std::collections::HashMap;

use crate::page::{NotebookId, Page, PageId};

/// Identifies one outgoing refresh of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefreshToken(u64);

impl RefreshToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct PageCache {
    pages: HashMap<PageId, Page>,
    latest: HashMap<PageId, RefreshToken>,
    next_token: u64,
    version: u64,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, page_id: PageId) -> Option<&Page> {
        self.pages.get(&page_id)
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    /// Monotonic counter bumped whenever backend data is merged in.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn notebook_of(&self, page_id: PageId) -> Option<NotebookId> {
        self.pages.get(&page_id).map(|p| p.notebook_id)
    }

    /// Local write that does not come from the backend (optimistic edits).
    /// Does not touch the version or outstanding refreshes.
    pub fn put_local(&mut self, page: Page) {
        self.pages.insert(page.id, page);
    }

    /// Mutates a cached page in place. Returns `false` if it is not cached.
    pub fn update_local(&mut self, page_id: PageId, f: impl FnOnce(&mut Page)) -> bool {
        match self.pages.get_mut(&page_id) {
            Some(page) => {
                f(page);
                true
            }
            None => false,
        }
    }

    /// Merges a record returned by a backend write. Any refresh still in
    /// flight for the same page was issued before this write and is retired.
    pub fn merge_remote(&mut self, page: Page) {
        self.retire(page.id);
        self.pages.insert(page.id, page);
        self.version += 1;
    }

    /// Replaces a batch of records, e.g. a notebook listing.
    pub fn merge_listing(&mut self, pages: Vec<Page>) {
        for page in pages {
            self.retire(page.id);
            self.pages.insert(page.id, page);
        }
        self.version += 1;
    }

    pub fn remove(&mut self, page_id: PageId) -> Option<Page> {
        self.latest.remove(&page_id);
        self.pages.remove(&page_id)
    }

    /// Drops every record and forgets all outstanding refreshes, so results
    /// of refreshes issued before the clear are discarded.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.latest.clear();
    }

    /// Issues the token for a new refresh of `page_id`. Only the most recently
    /// issued token for a page may complete.
    pub fn begin_refresh(&mut self, page_id: PageId) -> RefreshToken {
        let token = self.issue();
        self.latest.insert(page_id, token);
        token
    }

    /// Number of pages with a refresh still outstanding.
    pub fn pending_refreshes(&self) -> usize {
        self.latest.len()
    }

    pub fn is_latest(&self, page_id: PageId, token: RefreshToken) -> bool {
        self.latest.get(&page_id) == Some(&token)
    }

    /// Applies a refresh result. Returns `false` and leaves the cache alone
    /// when a newer refresh or backend write for the same page has been seen.
    pub fn complete_refresh(&mut self, token: RefreshToken, page: Page) -> bool {
        if !self.is_latest(page.id, token) {
            return false;
        }
        self.latest.remove(&page.id);
        self.pages.insert(page.id, page);
        self.version += 1;
        true
    }

    /// Marks a failed refresh as finished. The cached copy is kept as is.
    pub fn abandon_refresh(&mut self, page_id: PageId, token: RefreshToken) {
        if self.is_latest(page_id, token) {
            self.latest.remove(&page_id);
        }
    }

    /// With no entry left, every earlier token for this page is stale.
    fn retire(&mut self, page_id: PageId) {
        self.latest.remove(&page_id);
    }

    fn issue(&mut self) -> RefreshToken {
        self.next_token += 1;
        RefreshToken(self.next_token)
    }
}
