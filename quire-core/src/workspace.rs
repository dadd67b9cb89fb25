use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn, Instrument};

use crate::cache::{PageCache, RefreshToken};
use crate::config::WorkspaceConfig;
use crate::page::{NewPage, NotebookId, Page, PageId, PageUpdate};
use crate::pane::{Pane, PaneId};
use crate::persist::{load_state, WorkspaceSnapshot, WorkspaceStateStore};
use crate::recent::RecentPageEntry;
use crate::state::{Action, Effect, TabSeed, WorkspaceState};
use crate::store::{PageIndexer, PageStore, StoreError, StoreResult};

const UNTITLED: &str = "Untitled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceEvent {
    PaneOpened(PaneId),
    PaneClosed(PaneId),
    ActivePaneChanged(PaneId),
    SelectedPageChanged(Option<PageId>),
    NotebookChanged(NotebookId),
    PageRefreshed { page_id: PageId, cache_version: u64 },
}

/// The parts of the state that events are derived from.
struct Observed {
    panes: Vec<PaneId>,
    active: PaneId,
    selected: Option<PageId>,
}

impl Observed {
    fn of(state: &WorkspaceState) -> Self {
        Self {
            panes: state.panes().iter().map(|p| p.id()).collect(),
            active: state.active_pane_id(),
            selected: state.selected_page_id(),
        }
    }
}

enum IndexJob {
    Index(NotebookId, PageId),
    Remove(PageId),
}

/// Owns the pane layout, the recency log and the page cache of one window.
///
/// Layout operations are synchronous and return once the state and its
/// stored copy are updated; page refreshes they trigger run in the
/// background on the tokio runtime the workspace was created on.
pub struct Workspace {
    state: WorkspaceState,
    cache: Arc<Mutex<PageCache>>,
    store: Arc<dyn PageStore>,
    indexer: Arc<dyn PageIndexer>,
    layout: Arc<dyn WorkspaceStateStore>,
    config: WorkspaceConfig,
    notebook_id: Option<NotebookId>,
    last_error: Option<String>,
    events: Arc<Mutex<Vec<WorkspaceEvent>>>,
    runtime: Handle,
    background: Vec<JoinHandle<()>>,
}

impl Workspace {
    /// Restores the stored layout and binds the workspace to the current
    /// tokio runtime.
    pub fn new(
        store: Arc<dyn PageStore>,
        indexer: Arc<dyn PageIndexer>,
        layout: Arc<dyn WorkspaceStateStore>,
        config: WorkspaceConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current().context("workspace must be created inside a tokio runtime")?;
        let state = load_state(&*layout, config.recent_capacity);
        debug!(panes = state.panes().len(), recent = state.recent().len(), "workspace restored");
        Ok(Self {
            state,
            cache: Arc::new(Mutex::new(PageCache::new())),
            store,
            indexer,
            layout,
            config,
            notebook_id: None,
            last_error: None,
            events: Arc::new(Mutex::new(Vec::new())),
            runtime,
            background: Vec::new(),
        })
    }

    pub fn state(&self) -> &WorkspaceState {
        &self.state
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn panes(&self) -> &[Pane] {
        self.state.panes()
    }

    pub fn pane(&self, pane_id: PaneId) -> Option<&Pane> {
        self.state.registry().pane(pane_id)
    }

    pub fn active_pane_id(&self) -> PaneId {
        self.state.active_pane_id()
    }

    pub fn selected_page_id(&self) -> Option<PageId> {
        self.state.selected_page_id()
    }

    pub fn selected_page(&self) -> Option<Page> {
        self.selected_page_id().and_then(|id| self.page(id))
    }

    pub fn notebook_id(&self) -> Option<NotebookId> {
        self.notebook_id
    }

    /// Cached copy of a page, if it has been loaded.
    pub fn page(&self, page_id: PageId) -> Option<Page> {
        self.cache.lock().get(page_id).cloned()
    }

    pub fn cached_pages(&self) -> Vec<Page> {
        let mut pages: Vec<Page> = self.cache.lock().pages().cloned().collect();
        pages.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.title.cmp(&b.title)));
        pages
    }

    pub fn favorites(&self) -> Vec<Page> {
        let mut favorites: Vec<Page> = self
            .cache
            .lock()
            .pages()
            .filter(|p| p.is_favorite && !p.is_deleted())
            .cloned()
            .collect();
        favorites.sort_by(|a, b| a.title.cmp(&b.title));
        favorites
    }

    pub fn cache_version(&self) -> u64 {
        self.cache.lock().version()
    }

    pub fn recent_pages(&self, limit: usize) -> Vec<RecentPageEntry> {
        self.state.recent().list(limit).to_vec()
    }

    /// Message of the last failed page store write, cleared by the next
    /// successful one.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn events(&self) -> Arc<Mutex<Vec<WorkspaceEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn drain_events(&self) -> Vec<WorkspaceEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    // ---- layout operations ----

    pub fn open_in_new_pane(&mut self, page_id: Option<PageId>) -> PaneId {
        let page = page_id.map(|id| self.tab_seed(id));
        self.dispatch(Action::OpenInNewPane { page });
        self.active_pane_id()
    }

    pub fn open_in_pane(&mut self, pane_id: PaneId, page_id: Option<PageId>) {
        let page = page_id.map(|id| self.tab_seed(id));
        self.dispatch(Action::OpenInPane { pane_id, page });
    }

    /// Opens `page_id` in the active pane.
    pub fn open_page(&mut self, page_id: PageId) {
        let pane_id = self.active_pane_id();
        self.open_in_pane(pane_id, Some(page_id));
    }

    pub fn close_pane(&mut self, pane_id: PaneId) {
        self.dispatch(Action::ClosePane { pane_id });
    }

    pub fn set_active_pane(&mut self, pane_id: PaneId) {
        self.dispatch(Action::SetActivePane { pane_id });
    }

    pub fn split_pane(&mut self, pane_id: PaneId) -> Option<PaneId> {
        let before = self.state.panes().len();
        self.dispatch(Action::SplitPane { pane_id });
        (self.state.panes().len() > before).then(|| self.active_pane_id())
    }

    pub fn select_tab(&mut self, pane_id: PaneId, page_id: PageId) {
        self.dispatch(Action::SelectTab { pane_id, page_id });
    }

    pub fn close_tab(&mut self, pane_id: PaneId, page_id: PageId) {
        self.dispatch(Action::CloseTab { pane_id, page_id });
    }

    pub fn close_other_tabs(&mut self, pane_id: PaneId, keep: PageId) {
        self.dispatch(Action::CloseOtherTabs { pane_id, keep });
    }

    pub fn close_all_tabs(&mut self, pane_id: PaneId) {
        self.dispatch(Action::CloseAllTabs { pane_id });
    }

    pub fn pin_tab(&mut self, pane_id: PaneId, page_id: PageId) {
        self.dispatch(Action::PinTab { pane_id, page_id });
    }

    pub fn unpin_tab(&mut self, pane_id: PaneId, page_id: PageId) {
        self.dispatch(Action::UnpinTab { pane_id, page_id });
    }

    pub fn update_tab_title(&mut self, pane_id: PaneId, page_id: PageId, title: &str) {
        self.dispatch(Action::UpdateTabTitle {
            pane_id,
            page_id,
            title: title.to_string(),
        });
    }

    pub fn clear_recent(&mut self) {
        self.dispatch(Action::ClearRecent);
    }

    /// Fetches the canonical record of `page_id` in the background.
    pub fn refresh_page(&mut self, page_id: PageId) {
        self.spawn_refresh(page_id);
    }

    /// Waits for every background task started so far. Callers never have to
    /// do this; it is useful before shutdown and in tests.
    pub async fn settle(&mut self) {
        while !self.background.is_empty() {
            for handle in std::mem::take(&mut self.background) {
                if let Err(err) = handle.await {
                    warn!(error = %err, "background task failed");
                }
            }
        }
    }

    // ---- page store operations ----

    /// Makes `notebook_id` the current notebook and loads its page listing.
    ///
    /// Switching to another notebook empties the page cache; panes are kept
    /// unless `reset_panes_on_notebook_switch` is set.
    #[instrument(skip(self))]
    pub async fn open_notebook(&mut self, notebook_id: NotebookId) -> StoreResult<Vec<Page>> {
        if self.notebook_id != Some(notebook_id) {
            let switching = self.notebook_id.is_some();
            self.cache.lock().clear();
            if switching && self.config.reset_panes_on_notebook_switch {
                self.dispatch(Action::ResetPanes);
            }
            self.notebook_id = Some(notebook_id);
            self.events.lock().push(WorkspaceEvent::NotebookChanged(notebook_id));
        }
        let result = self.store.list_pages(notebook_id).await;
        let pages = self.record(result)?;
        self.cache.lock().merge_listing(pages.clone());
        Ok(pages)
    }

    #[instrument(skip(self, new_page), fields(title = %new_page.title))]
    pub async fn create_page(&mut self, new_page: NewPage) -> StoreResult<Page> {
        let notebook_id = self.require_notebook()?;
        let result = self.store.create_page(notebook_id, new_page).await;
        let page = self.record(result)?;
        self.cache.lock().merge_remote(page.clone());
        self.spawn_index(IndexJob::Index(notebook_id, page.id));
        Ok(page)
    }

    /// Writes a partial update. Title and favorite changes are applied to the
    /// cache and tabs first and stay applied if the write fails.
    #[instrument(skip(self, update))]
    pub async fn update_page(&mut self, page_id: PageId, update: PageUpdate) -> StoreResult<Page> {
        let notebook_id = self.page_notebook(page_id)?;
        if let Some(is_favorite) = update.is_favorite {
            self.cache
                .lock()
                .update_local(page_id, |p| p.is_favorite = is_favorite);
        }
        if let Some(title) = &update.title {
            self.cache
                .lock()
                .update_local(page_id, |p| p.title = title.clone());
            self.dispatch(Action::PageRenamed {
                page_id,
                title: title.clone(),
            });
        }

        let result = self.store.update_page(notebook_id, page_id, update).await;
        let page = self.record(result)?;
        let renamed = self.state.panes().iter().any(|pane| {
            pane.tab(page_id)
                .map_or(false, |tab| tab.title != page.title)
        });
        if renamed {
            self.dispatch(Action::PageRenamed {
                page_id,
                title: page.title.clone(),
            });
        }
        self.cache.lock().merge_remote(page.clone());
        self.spawn_index(IndexJob::Index(notebook_id, page_id));
        Ok(page)
    }

    pub async fn rename_page(&mut self, page_id: PageId, title: &str) -> StoreResult<Page> {
        self.update_page(page_id, PageUpdate::title(title)).await
    }

    /// Flips the favorite flag of a page, loading the page first if needed.
    pub async fn toggle_favorite(&mut self, page_id: PageId) -> StoreResult<Page> {
        let cached = self.cache.lock().get(page_id).map(|p| p.is_favorite);
        let current = match cached {
            Some(flag) => flag,
            None => {
                let notebook_id = self.page_notebook(page_id)?;
                let result = self.store.get_page(notebook_id, page_id).await;
                let page = self.record(result)?;
                let flag = page.is_favorite;
                self.cache.lock().merge_remote(page);
                flag
            }
        };
        self.update_page(page_id, PageUpdate::favorite(!current)).await
    }

    /// Moves a page to the trash and closes its tabs.
    #[instrument(skip(self))]
    pub async fn delete_page(&mut self, page_id: PageId) -> StoreResult<()> {
        let notebook_id = self.page_notebook(page_id)?;
        let result = self.store.delete_page(notebook_id, page_id).await;
        self.record(result)?;
        self.cache.lock().remove(page_id);
        self.dispatch(Action::PageRemoved {
            page_id,
            forget_recent: false,
        });
        self.spawn_index(IndexJob::Remove(page_id));
        Ok(())
    }

    pub async fn restore_page(&mut self, page_id: PageId) -> StoreResult<Page> {
        let notebook_id = self.require_notebook()?;
        let result = self.store.restore_page(notebook_id, page_id).await;
        let page = self.record(result)?;
        self.cache.lock().merge_remote(page.clone());
        self.spawn_index(IndexJob::Index(notebook_id, page_id));
        Ok(page)
    }

    /// Deletes a page for good, also dropping it from the recent list.
    pub async fn permanent_delete_page(&mut self, page_id: PageId) -> StoreResult<()> {
        let notebook_id = self.page_notebook(page_id)?;
        let result = self.store.permanent_delete_page(notebook_id, page_id).await;
        self.record(result)?;
        self.cache.lock().remove(page_id);
        self.dispatch(Action::PageRemoved {
            page_id,
            forget_recent: true,
        });
        self.spawn_index(IndexJob::Remove(page_id));
        Ok(())
    }

    pub async fn move_page(
        &mut self,
        page_id: PageId,
        parent_page_id: Option<PageId>,
        position: Option<i32>,
    ) -> StoreResult<Page> {
        let notebook_id = self.page_notebook(page_id)?;
        let result = self
            .store
            .move_page_to_parent(notebook_id, page_id, parent_page_id, position)
            .await;
        let page = self.record(result)?;
        self.cache.lock().merge_remote(page.clone());
        Ok(page)
    }

    pub async fn reorder_pages(&mut self, ordered: &[PageId]) -> StoreResult<()> {
        let notebook_id = self.require_notebook()?;
        let result = self.store.reorder_pages(notebook_id, ordered).await;
        self.record(result)?;
        let mut cache = self.cache.lock();
        for (index, page_id) in ordered.iter().enumerate() {
            cache.update_local(*page_id, |p| p.position = index as i32);
        }
        Ok(())
    }

    pub async fn archive_page(&mut self, page_id: PageId) -> StoreResult<Page> {
        let notebook_id = self.page_notebook(page_id)?;
        let result = self.store.archive_page(notebook_id, page_id).await;
        let page = self.record(result)?;
        self.cache.lock().merge_remote(page.clone());
        Ok(page)
    }

    pub async fn unarchive_page(&mut self, page_id: PageId) -> StoreResult<Page> {
        let notebook_id = self.page_notebook(page_id)?;
        let result = self.store.unarchive_page(notebook_id, page_id).await;
        let page = self.record(result)?;
        self.cache.lock().merge_remote(page.clone());
        Ok(page)
    }

    // ---- internals ----

    fn dispatch(&mut self, action: Action) {
        let before = Observed::of(&self.state);
        let effects = self.state.apply(action);
        for effect in effects {
            match effect {
                Effect::PageActivated { pane_id, page_id } => {
                    debug!(pane = %pane_id, page = %page_id, "page activated");
                    self.record_visit(page_id);
                    self.spawn_refresh(page_id);
                }
            }
        }
        self.emit_changes(before);
        self.persist();
    }

    fn record_visit(&mut self, page_id: PageId) {
        let cached = self
            .cache
            .lock()
            .get(page_id)
            .map(|p| (p.notebook_id, p.title.clone()));
        let (notebook_id, title) = match cached {
            Some(found) => found,
            None => match self.notebook_for(page_id) {
                Some(notebook_id) => (notebook_id, self.tab_title(page_id)),
                None => {
                    debug!(page = %page_id, "no notebook known, visit not recorded");
                    return;
                }
            },
        };
        self.state.apply(Action::RecordVisit(RecentPageEntry {
            page_id,
            notebook_id,
            title,
            accessed_at: Utc::now(),
        }));
    }

    fn spawn_refresh(&mut self, page_id: PageId) {
        let Some(notebook_id) = self.notebook_for(page_id) else {
            debug!(page = %page_id, "no notebook known, refresh skipped");
            return;
        };
        let token = self.cache.lock().begin_refresh(page_id);
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let events = Arc::clone(&self.events);
        let span = tracing::debug_span!("refresh", page = %page_id, token = token.value());
        let task = async move {
            match store.get_page(notebook_id, page_id).await {
                Ok(page) => match merge_refresh(&cache, token, page) {
                    Some(cache_version) => {
                        events.lock().push(WorkspaceEvent::PageRefreshed {
                            page_id,
                            cache_version,
                        });
                    }
                    None => debug!("stale refresh discarded"),
                },
                Err(err) => {
                    cache.lock().abandon_refresh(page_id, token);
                    debug!(error = %err, "refresh failed, keeping cached copy");
                }
            }
        };
        self.track(self.runtime.spawn(task.instrument(span)));
    }

    fn spawn_index(&mut self, job: IndexJob) {
        let indexer = Arc::clone(&self.indexer);
        let task = async move {
            let result = match job {
                IndexJob::Index(notebook_id, page_id) => indexer.index_page(notebook_id, page_id).await,
                IndexJob::Remove(page_id) => indexer.remove_page(page_id).await,
            };
            if let Err(err) = result {
                warn!(error = %format!("{err:#}"), "indexing failed");
            }
        };
        self.track(self.runtime.spawn(task));
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.background.retain(|h| !h.is_finished());
        self.background.push(handle);
    }

    fn persist(&self) {
        let snapshot = WorkspaceSnapshot::capture(&self.state);
        if let Err(err) = self.layout.save(&snapshot) {
            warn!(error = %format!("{err:#}"), "failed to save workspace layout");
        }
    }

    fn emit_changes(&self, before: Observed) {
        let after = Observed::of(&self.state);
        let mut events = self.events.lock();
        for id in after.panes.iter().filter(|id| !before.panes.contains(id)) {
            events.push(WorkspaceEvent::PaneOpened(*id));
        }
        for id in before.panes.iter().filter(|id| !after.panes.contains(id)) {
            events.push(WorkspaceEvent::PaneClosed(*id));
        }
        if after.active != before.active {
            events.push(WorkspaceEvent::ActivePaneChanged(after.active));
        }
        if after.selected != before.selected {
            events.push(WorkspaceEvent::SelectedPageChanged(after.selected));
        }
    }

    fn record<T>(&mut self, result: StoreResult<T>) -> StoreResult<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(err) => {
                warn!(error = %err, "page store call failed");
                self.last_error = Some(err.user_message());
            }
        }
        result
    }

    fn require_notebook(&mut self) -> StoreResult<NotebookId> {
        let notebook_id = self.notebook_id.ok_or(StoreError::NoNotebook);
        self.record(notebook_id)
    }

    fn page_notebook(&mut self, page_id: PageId) -> StoreResult<NotebookId> {
        let notebook_id = self.notebook_for(page_id).ok_or(StoreError::NoNotebook);
        self.record(notebook_id)
    }

    /// Notebook a page belongs to: from the cache, else from an earlier visit
    /// (tabs outlive notebook switches), else the current notebook.
    fn notebook_for(&self, page_id: PageId) -> Option<NotebookId> {
        self.cache
            .lock()
            .notebook_of(page_id)
            .or_else(|| self.state.recent().get(page_id).map(|e| e.notebook_id))
            .or(self.notebook_id)
    }

    fn tab_title(&self, page_id: PageId) -> String {
        self.state
            .panes()
            .iter()
            .find_map(|p| p.tab(page_id))
            .map(|t| t.title.clone())
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    fn tab_seed(&self, page_id: PageId) -> TabSeed {
        let title = self
            .cache
            .lock()
            .get(page_id)
            .map(|p| p.title.clone())
            .unwrap_or_else(|| self.tab_title(page_id));
        TabSeed::new(page_id, title)
    }
}

fn merge_refresh(cache: &Mutex<PageCache>, token: RefreshToken, page: Page) -> Option<u64> {
    let mut cache = cache.lock();
    cache.complete_refresh(token, page).then(|| cache.version())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryWorkspaceStore;
    use crate::store::{MemoryPageStore, NullIndexer};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;
    use uuid::Uuid;

    /// Memory store whose reads can be held back and whose writes can fail.
    #[derive(Default)]
    struct ScriptedStore {
        inner: MemoryPageStore,
        gates: Mutex<VecDeque<oneshot::Receiver<String>>>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl ScriptedStore {
        /// The next `get_page` call waits for a title sent on the returned sender.
        fn hold_next_read(&self) -> oneshot::Sender<String> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().push_back(rx);
            tx
        }

        fn check_write(&self) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PageStore for ScriptedStore {
        async fn list_pages(&self, notebook_id: NotebookId) -> StoreResult<Vec<Page>> {
            self.inner.list_pages(notebook_id).await
        }

        async fn get_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("offline".to_string()));
            }
            let gate = self.gates.lock().pop_front();
            let mut page = self.inner.get_page(notebook_id, page_id).await?;
            if let Some(gate) = gate {
                page.title = gate
                    .await
                    .map_err(|_| StoreError::Backend("gate dropped".to_string()))?;
            }
            Ok(page)
        }

        async fn create_page(&self, notebook_id: NotebookId, new_page: NewPage) -> StoreResult<Page> {
            self.check_write()?;
            self.inner.create_page(notebook_id, new_page).await
        }

        async fn update_page(
            &self,
            notebook_id: NotebookId,
            page_id: PageId,
            update: PageUpdate,
        ) -> StoreResult<Page> {
            self.check_write()?;
            self.inner.update_page(notebook_id, page_id, update).await
        }

        async fn delete_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<()> {
            self.check_write()?;
            self.inner.delete_page(notebook_id, page_id).await
        }

        async fn restore_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page> {
            self.check_write()?;
            self.inner.restore_page(notebook_id, page_id).await
        }

        async fn permanent_delete_page(
            &self,
            notebook_id: NotebookId,
            page_id: PageId,
        ) -> StoreResult<()> {
            self.check_write()?;
            self.inner.permanent_delete_page(notebook_id, page_id).await
        }

        async fn move_page_to_parent(
            &self,
            notebook_id: NotebookId,
            page_id: PageId,
            parent_page_id: Option<PageId>,
            position: Option<i32>,
        ) -> StoreResult<Page> {
            self.check_write()?;
            self.inner
                .move_page_to_parent(notebook_id, page_id, parent_page_id, position)
                .await
        }

        async fn reorder_pages(&self, notebook_id: NotebookId, ordered: &[PageId]) -> StoreResult<()> {
            self.check_write()?;
            self.inner.reorder_pages(notebook_id, ordered).await
        }

        async fn archive_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page> {
            self.check_write()?;
            self.inner.archive_page(notebook_id, page_id).await
        }

        async fn unarchive_page(
            &self,
            notebook_id: NotebookId,
            page_id: PageId,
        ) -> StoreResult<Page> {
            self.check_write()?;
            self.inner.unarchive_page(notebook_id, page_id).await
        }
    }

    #[derive(Default)]
    struct FailingIndexer {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageIndexer for FailingIndexer {
        async fn index_page(&self, _notebook_id: NotebookId, page_id: PageId) -> anyhow::Result<()> {
            self.calls.lock().push(format!("index {page_id}"));
            anyhow::bail!("index unavailable")
        }

        async fn remove_page(&self, page_id: PageId) -> anyhow::Result<()> {
            self.calls.lock().push(format!("remove {page_id}"));
            anyhow::bail!("index unavailable")
        }
    }

    struct Fixture {
        store: Arc<ScriptedStore>,
        layout: Arc<MemoryWorkspaceStore>,
        notebook: NotebookId,
        workspace: Workspace,
    }

    async fn fixture(titles: &[&str]) -> (Fixture, Vec<PageId>) {
        fixture_with(titles, WorkspaceConfig::default(), Arc::new(NullIndexer)).await
    }

    async fn fixture_with(
        titles: &[&str],
        config: WorkspaceConfig,
        indexer: Arc<dyn PageIndexer>,
    ) -> (Fixture, Vec<PageId>) {
        let store = Arc::new(ScriptedStore::default());
        let layout = Arc::new(MemoryWorkspaceStore::new());
        let notebook = Uuid::new_v4();
        let mut ids = Vec::new();
        for title in titles {
            let page = store
                .inner
                .create_page(notebook, NewPage::titled(*title))
                .await
                .unwrap();
            ids.push(page.id);
        }
        let mut workspace = Workspace::new(store.clone(), indexer, layout.clone(), config).unwrap();
        workspace.open_notebook(notebook).await.unwrap();
        (
            Fixture {
                store,
                layout,
                notebook,
                workspace,
            },
            ids,
        )
    }

    #[tokio::test]
    async fn new_pane_scenario() {
        let (mut fx, ids) = fixture(&["P1"]).await;
        let ws = &mut fx.workspace;
        let pane1 = ws.active_pane_id();

        let pane2 = ws.open_in_new_pane(Some(ids[0]));
        assert_eq!(ws.panes().len(), 2);
        assert_eq!(ws.active_pane_id(), pane2);
        let tabs = ws.pane(pane2).unwrap().tabs();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0].page_id, ids[0]);
        assert_eq!(tabs[0].title, "P1");
        assert!(!tabs[0].is_pinned);

        ws.close_pane(pane1);
        assert_eq!(ws.panes().len(), 1);
        assert_eq!(ws.active_pane_id(), pane2);

        ws.close_pane(pane2);
        assert_eq!(ws.panes().len(), 1);
        assert_eq!(ws.selected_page_id(), Some(ids[0]));
    }

    #[tokio::test]
    async fn activation_records_visit_and_refreshes_cache() {
        let (mut fx, ids) = fixture(&["A", "B"]).await;
        let version = fx.workspace.cache_version();
        fx.workspace.open_page(ids[0]);
        fx.workspace.open_page(ids[1]);
        fx.workspace.open_page(ids[0]);
        fx.workspace.settle().await;

        let recent = fx.workspace.recent_pages(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].page_id, ids[0]);
        assert_eq!(recent[0].notebook_id, fx.notebook);
        assert_eq!(recent[1].title, "B");
        assert!(fx.workspace.cache_version() > version);

        let refreshed = fx
            .workspace
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, WorkspaceEvent::PageRefreshed { .. }))
            .count();
        assert!(refreshed >= 2);
    }

    #[tokio::test]
    async fn older_refresh_never_overwrites_newer_one() {
        let (mut fx, ids) = fixture(&["Page"]).await;
        let pane = fx.workspace.active_pane_id();
        let first = fx.store.hold_next_read();
        let second = fx.store.hold_next_read();

        fx.workspace.open_in_pane(pane, Some(ids[0]));
        fx.workspace.select_tab(pane, ids[0]);

        second.send("from second".to_string()).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        first.send("from first".to_string()).unwrap();
        fx.workspace.settle().await;

        assert_eq!(fx.workspace.page(ids[0]).unwrap().title, "from second");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_copy_silently() {
        let (mut fx, ids) = fixture(&["Cached"]).await;
        fx.store.fail_reads.store(true, Ordering::SeqCst);
        let version = fx.workspace.cache_version();

        fx.workspace.open_page(ids[0]);
        fx.workspace.settle().await;

        assert_eq!(fx.workspace.page(ids[0]).unwrap().title, "Cached");
        assert_eq!(fx.workspace.cache_version(), version);
        assert!(fx.workspace.last_error().is_none());
        assert_eq!(fx.workspace.selected_page_id(), Some(ids[0]));
    }

    #[tokio::test]
    async fn every_mutation_is_persisted() {
        let (mut fx, ids) = fixture(&["A", "B"]).await;
        fx.workspace.open_page(ids[0]);
        let split = fx.workspace.split_pane(fx.workspace.active_pane_id()).unwrap();
        fx.workspace.pin_tab(split, ids[0]);

        let snapshot = fx.layout.snapshot().unwrap();
        assert_eq!(snapshot.panes.len(), 2);
        assert_eq!(snapshot.active_pane_id, Some(split));
        assert!(snapshot.panes[1].tabs[0].is_pinned);
        assert_eq!(snapshot.recent_pages.len(), 1);

        let restored = load_state(&*fx.layout, WorkspaceConfig::default().recent_capacity);
        assert_eq!(&restored, fx.workspace.state());
    }

    #[tokio::test]
    async fn failed_write_sets_error_and_keeps_optimistic_change() {
        let (mut fx, ids) = fixture(&["Draft"]).await;
        fx.workspace.open_page(ids[0]);
        fx.workspace.settle().await;
        fx.store.fail_writes.store(true, Ordering::SeqCst);

        let err = fx.workspace.toggle_favorite(ids[0]).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(fx.workspace.last_error().unwrap().contains("disk full"));
        assert!(fx.workspace.page(ids[0]).unwrap().is_favorite);

        fx.workspace.rename_page(ids[0], "Final").await.unwrap_err();
        let pane = fx.workspace.active_pane_id();
        assert_eq!(fx.workspace.pane(pane).unwrap().tab(ids[0]).unwrap().title, "Final");

        fx.store.fail_writes.store(false, Ordering::SeqCst);
        let page = fx.workspace.toggle_favorite(ids[0]).await.unwrap();
        assert!(!page.is_favorite);
        assert!(fx.workspace.last_error().is_none());
    }

    #[tokio::test]
    async fn rename_updates_tabs_in_every_pane() {
        let (mut fx, ids) = fixture(&["Old"]).await;
        let left = fx.workspace.active_pane_id();
        fx.workspace.open_in_pane(left, Some(ids[0]));
        let right = fx.workspace.open_in_new_pane(Some(ids[0]));

        let page = fx.workspace.rename_page(ids[0], "New").await.unwrap();
        assert_eq!(page.title, "New");
        for pane in [left, right] {
            assert_eq!(fx.workspace.pane(pane).unwrap().tab(ids[0]).unwrap().title, "New");
        }
        assert_eq!(fx.workspace.recent_pages(1)[0].title, "New");
    }

    #[tokio::test]
    async fn favorites_follow_toggles() {
        let (mut fx, ids) = fixture(&["Zeta", "Alpha", "Mid"]).await;
        fx.workspace.toggle_favorite(ids[0]).await.unwrap();
        fx.workspace.toggle_favorite(ids[1]).await.unwrap();
        let titles: Vec<String> = fx.workspace.favorites().into_iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["Alpha".to_string(), "Zeta".to_string()]);

        fx.workspace.toggle_favorite(ids[0]).await.unwrap();
        assert_eq!(fx.workspace.favorites().len(), 1);
    }

    #[tokio::test]
    async fn delete_closes_tabs_and_reports_to_indexer() {
        let indexer = Arc::new(FailingIndexer::default());
        let (mut fx, ids) =
            fixture_with(&["A", "B", "C"], WorkspaceConfig::default(), indexer.clone()).await;
        let pane = fx.workspace.active_pane_id();
        for id in &ids {
            fx.workspace.open_in_pane(pane, Some(*id));
        }
        fx.workspace.select_tab(pane, ids[1]);

        fx.workspace.delete_page(ids[1]).await.unwrap();
        fx.workspace.settle().await;

        assert!(fx.workspace.pane(pane).unwrap().tab(ids[1]).is_none());
        assert_eq!(fx.workspace.selected_page_id(), Some(ids[2]));
        assert!(fx.workspace.page(ids[1]).is_none());
        assert!(fx.workspace.last_error().is_none());
        assert_eq!(indexer.calls.lock().as_slice(), &[format!("remove {}", ids[1])]);
        assert!(fx.workspace.recent_pages(10).iter().any(|e| e.page_id == ids[1]));

        fx.workspace.permanent_delete_page(ids[1]).await.unwrap();
        assert!(fx.workspace.recent_pages(10).iter().all(|e| e.page_id != ids[1]));
    }

    #[tokio::test]
    async fn create_requires_open_notebook() {
        let store = Arc::new(MemoryPageStore::new());
        let mut workspace = Workspace::new(
            store,
            Arc::new(NullIndexer),
            Arc::new(MemoryWorkspaceStore::new()),
            WorkspaceConfig::default(),
        )
        .unwrap();

        let err = workspace.create_page(NewPage::titled("Orphan")).await.unwrap_err();
        assert!(matches!(err, StoreError::NoNotebook));
        assert_eq!(workspace.last_error(), Some("Open a notebook first"));
    }

    #[tokio::test]
    async fn notebook_switch_clears_cache_but_keeps_panes_by_default() {
        let (mut fx, ids) = fixture(&["A"]).await;
        fx.workspace.open_page(ids[0]);
        fx.workspace.settle().await;

        let other = Uuid::new_v4();
        fx.workspace.open_notebook(other).await.unwrap();
        assert!(fx.workspace.page(ids[0]).is_none());
        assert_eq!(fx.workspace.selected_page_id(), Some(ids[0]));
        assert_eq!(fx.workspace.notebook_id(), Some(other));
    }

    #[tokio::test]
    async fn tabs_kept_across_switch_stay_in_their_notebook() {
        let (mut fx, ids) = fixture(&["A", "B"]).await;
        let pane = fx.workspace.active_pane_id();
        fx.workspace.open_in_pane(pane, Some(ids[0]));
        fx.workspace.open_in_pane(pane, Some(ids[1]));
        fx.workspace.settle().await;

        let other = Uuid::new_v4();
        fx.workspace.open_notebook(other).await.unwrap();
        fx.workspace.select_tab(pane, ids[0]);
        fx.workspace.settle().await;

        let entry = fx.workspace.recent_pages(1).remove(0);
        assert_eq!(entry.page_id, ids[0]);
        assert_eq!(entry.notebook_id, fx.notebook);
        assert_eq!(entry.title, "A");
        let refreshed = fx.workspace.page(ids[0]).unwrap();
        assert_eq!(refreshed.notebook_id, fx.notebook);
    }

    #[tokio::test]
    async fn notebook_switch_can_reset_panes() {
        let config = WorkspaceConfig {
            reset_panes_on_notebook_switch: true,
            ..WorkspaceConfig::default()
        };
        let (mut fx, ids) = fixture_with(&["A"], config, Arc::new(NullIndexer)).await;
        fx.workspace.open_in_new_pane(Some(ids[0]));
        assert_eq!(fx.workspace.panes().len(), 2);

        fx.workspace.open_notebook(Uuid::new_v4()).await.unwrap();
        assert_eq!(fx.workspace.panes().len(), 1);
        assert_eq!(fx.workspace.selected_page_id(), None);
    }

    #[tokio::test]
    async fn refresh_from_previous_notebook_is_dropped() {
        let (mut fx, ids) = fixture(&["A"]).await;
        let gate = fx.store.hold_next_read();
        fx.workspace.open_page(ids[0]);

        fx.workspace.open_notebook(Uuid::new_v4()).await.unwrap();
        gate.send("late".to_string()).unwrap();
        fx.workspace.settle().await;

        assert!(fx.workspace.page(ids[0]).is_none());
    }

    #[tokio::test]
    async fn layout_events_describe_changes() {
        let (mut fx, ids) = fixture(&["A"]).await;
        fx.workspace.drain_events();
        let first = fx.workspace.active_pane_id();

        let second = fx.workspace.open_in_new_pane(Some(ids[0]));
        let events = fx.workspace.drain_events();
        assert!(events.contains(&WorkspaceEvent::PaneOpened(second)));
        assert!(events.contains(&WorkspaceEvent::ActivePaneChanged(second)));
        assert!(events.contains(&WorkspaceEvent::SelectedPageChanged(Some(ids[0]))));

        fx.workspace.close_pane(second);
        let events = fx.workspace.drain_events();
        assert!(events.contains(&WorkspaceEvent::PaneClosed(second)));
        assert!(events.contains(&WorkspaceEvent::ActivePaneChanged(first)));
    }

    #[tokio::test]
    async fn move_and_reorder_update_cache() {
        let (mut fx, ids) = fixture(&["Parent", "Child", "Other"]).await;
        let moved = fx.workspace.move_page(ids[1], Some(ids[0]), Some(0)).await.unwrap();
        assert_eq!(moved.parent_page_id, Some(ids[0]));
        assert_eq!(fx.workspace.page(ids[1]).unwrap().parent_page_id, Some(ids[0]));

        let err = fx.workspace.move_page(ids[0], Some(ids[1]), None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidMove(_)));
        assert!(fx.workspace.last_error().is_some());

        fx.workspace.reorder_pages(&[ids[2], ids[0]]).await.unwrap();
        assert_eq!(fx.workspace.page(ids[2]).unwrap().position, 0);
        assert_eq!(fx.workspace.page(ids[0]).unwrap().position, 1);

        fx.workspace.archive_page(ids[2]).await.unwrap();
        assert!(fx.workspace.page(ids[2]).unwrap().is_archived);
        let listed = fx.workspace.open_notebook(fx.notebook).await.unwrap();
        assert!(listed.iter().all(|p| p.id != ids[2]));
        fx.workspace.unarchive_page(ids[2]).await.unwrap();
        assert!(!fx.workspace.page(ids[2]).unwrap().is_archived);
    }
}
