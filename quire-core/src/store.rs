use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::instrument;

use crate::page::{NewPage, NotebookId, Page, PageId, PageUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("page not found: {0}")]
    PageNotFound(PageId),

    #[error("invalid move: {0}")]
    InvalidMove(String),

    #[error("no notebook is open")]
    NoNotebook,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Short message for the workspace error field.
    pub fn user_message(&self) -> String {
        match self {
            Self::PageNotFound(_) => "Page no longer exists".to_string(),
            Self::InvalidMove(msg) => msg.clone(),
            Self::NoNotebook => "Open a notebook first".to_string(),
            Self::Io(e) => format!("File error: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
            Self::Backend(msg) => format!("Failed to save: {msg}"),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The backing page store. It owns page content; the workspace only mirrors it.
#[async_trait]
pub trait PageStore: Send + Sync {
    async fn list_pages(&self, notebook_id: NotebookId) -> StoreResult<Vec<Page>>;
    async fn get_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page>;
    async fn create_page(&self, notebook_id: NotebookId, new_page: NewPage) -> StoreResult<Page>;
    async fn update_page(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
        update: PageUpdate,
    ) -> StoreResult<Page>;
    /// Soft delete: the page keeps existing with `deleted_at` set.
    async fn delete_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<()>;
    async fn restore_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page>;
    async fn permanent_delete_page(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
    ) -> StoreResult<()>;
    async fn move_page_to_parent(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
        parent_page_id: Option<PageId>,
        position: Option<i32>,
    ) -> StoreResult<Page>;
    async fn reorder_pages(&self, notebook_id: NotebookId, ordered: &[PageId]) -> StoreResult<()>;
    async fn archive_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page>;
    async fn unarchive_page(&self, notebook_id: NotebookId, page_id: PageId)
        -> StoreResult<Page>;
}

/// Search indexing collaborator. Calls are fire-and-forget from the workspace.
#[async_trait]
pub trait PageIndexer: Send + Sync {
    async fn index_page(&self, notebook_id: NotebookId, page_id: PageId) -> anyhow::Result<()>;
    async fn remove_page(&self, page_id: PageId) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct NullIndexer;

#[async_trait]
impl PageIndexer for NullIndexer {
    async fn index_page(&self, _notebook_id: NotebookId, _page_id: PageId) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove_page(&self, _page_id: PageId) -> anyhow::Result<()> {
        Ok(())
    }
}

type NotebookPages = HashMap<PageId, Page>;

fn lookup(pages: &NotebookPages, page_id: PageId) -> StoreResult<&Page> {
    pages.get(&page_id).ok_or(StoreError::PageNotFound(page_id))
}

fn lookup_mut(pages: &mut NotebookPages, page_id: PageId) -> StoreResult<&mut Page> {
    pages.get_mut(&page_id).ok_or(StoreError::PageNotFound(page_id))
}

fn visible_sorted(pages: &NotebookPages) -> Vec<Page> {
    let mut listed: Vec<Page> = pages
        .values()
        .filter(|p| !p.is_deleted() && !p.is_archived)
        .cloned()
        .collect();
    listed.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.title.cmp(&b.title)));
    listed
}

fn build_page(pages: &NotebookPages, notebook_id: NotebookId, new_page: NewPage) -> Page {
    let mut page = Page::new(notebook_id, new_page.title);
    page.folder_id = new_page.folder_id;
    page.parent_page_id = new_page.parent_page_id;
    page.section_id = new_page.section_id;
    page.position = pages
        .values()
        .filter(|p| p.parent_page_id == page.parent_page_id && p.folder_id == page.folder_id)
        .map(|p| p.position + 1)
        .max()
        .unwrap_or(0);
    page
}

fn move_to_parent(
    pages: &mut NotebookPages,
    page_id: PageId,
    parent_page_id: Option<PageId>,
    position: Option<i32>,
) -> StoreResult<Page> {
    lookup(pages, page_id)?;
    if let Some(parent_id) = parent_page_id {
        if parent_id == page_id {
            return Err(StoreError::InvalidMove(
                "Cannot make a page its own parent".to_string(),
            ));
        }
        let mut ancestor = Some(parent_id);
        while let Some(check_id) = ancestor {
            if check_id == page_id {
                return Err(StoreError::InvalidMove(
                    "Cannot create circular parent reference".to_string(),
                ));
            }
            ancestor = lookup(pages, check_id)?.parent_page_id;
        }
    }

    let page = lookup_mut(pages, page_id)?;
    page.parent_page_id = parent_page_id;
    // nested pages do not sit in folders directly
    if parent_page_id.is_some() {
        page.folder_id = None;
    }
    if let Some(position) = position {
        page.position = position;
    }
    page.updated_at = Utc::now();
    Ok(page.clone())
}

fn reorder(pages: &mut NotebookPages, ordered: &[PageId]) -> StoreResult<Vec<Page>> {
    let mut touched = Vec::with_capacity(ordered.len());
    for (index, page_id) in ordered.iter().enumerate() {
        let page = lookup_mut(pages, *page_id)?;
        page.position = index as i32;
        touched.push(page.clone());
    }
    Ok(touched)
}

/// In-process page store, used by tests and as a scratch backend.
pub struct MemoryPageStore {
    notebooks: Mutex<HashMap<NotebookId, NotebookPages>>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self {
            notebooks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` on the notebook's pages. Unknown notebooks look empty and are
    /// not created; only `create_page` adds a notebook.
    fn with_notebook<T>(
        &self,
        notebook_id: NotebookId,
        f: impl FnOnce(&mut NotebookPages) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut notebooks = self.notebooks.lock();
        match notebooks.get_mut(&notebook_id) {
            Some(pages) => f(pages),
            None => f(&mut HashMap::new()),
        }
    }

    pub fn notebook_count(&self) -> usize {
        self.notebooks.lock().len()
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageStore for MemoryPageStore {
    async fn list_pages(&self, notebook_id: NotebookId) -> StoreResult<Vec<Page>> {
        self.with_notebook(notebook_id, |pages| Ok(visible_sorted(pages)))
    }

    async fn get_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page> {
        self.with_notebook(notebook_id, |pages| lookup(pages, page_id).cloned())
    }

    async fn create_page(&self, notebook_id: NotebookId, new_page: NewPage) -> StoreResult<Page> {
        let mut notebooks = self.notebooks.lock();
        let pages = notebooks.entry(notebook_id).or_default();
        let page = build_page(pages, notebook_id, new_page);
        pages.insert(page.id, page.clone());
        Ok(page)
    }

    async fn update_page(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
        update: PageUpdate,
    ) -> StoreResult<Page> {
        self.with_notebook(notebook_id, |pages| {
            let page = lookup_mut(pages, page_id)?;
            page.apply_update(&update);
            Ok(page.clone())
        })
    }

    async fn delete_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<()> {
        self.with_notebook(notebook_id, |pages| {
            lookup_mut(pages, page_id)?.deleted_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn restore_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page> {
        self.with_notebook(notebook_id, |pages| {
            let page = lookup_mut(pages, page_id)?;
            page.deleted_at = None;
            Ok(page.clone())
        })
    }

    async fn permanent_delete_page(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
    ) -> StoreResult<()> {
        self.with_notebook(notebook_id, |pages| {
            pages
                .remove(&page_id)
                .map(|_| ())
                .ok_or(StoreError::PageNotFound(page_id))
        })
    }

    async fn move_page_to_parent(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
        parent_page_id: Option<PageId>,
        position: Option<i32>,
    ) -> StoreResult<Page> {
        self.with_notebook(notebook_id, |pages| {
            move_to_parent(pages, page_id, parent_page_id, position)
        })
    }

    async fn reorder_pages(&self, notebook_id: NotebookId, ordered: &[PageId]) -> StoreResult<()> {
        self.with_notebook(notebook_id, |pages| reorder(pages, ordered).map(|_| ()))
    }

    async fn archive_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page> {
        self.with_notebook(notebook_id, |pages| {
            let page = lookup_mut(pages, page_id)?;
            page.is_archived = true;
            Ok(page.clone())
        })
    }

    async fn unarchive_page(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
    ) -> StoreResult<Page> {
        self.with_notebook(notebook_id, |pages| {
            let page = lookup_mut(pages, page_id)?;
            page.is_archived = false;
            Ok(page.clone())
        })
    }
}

/// Page store keeping one JSON file per page under `<root>/<notebook>/<page>.json`.
pub struct FilePageStore {
    root: PathBuf,
}

impl FilePageStore {
    pub fn new(root: PathBuf) -> StoreResult<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn notebook_dir(&self, notebook_id: NotebookId) -> PathBuf {
        self.root.join(notebook_id.to_string())
    }

    fn page_path(&self, notebook_id: NotebookId, page_id: PageId) -> PathBuf {
        self.notebook_dir(notebook_id).join(format!("{page_id}.json"))
    }

    fn read_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page> {
        let path = self.page_path(notebook_id, page_id);
        match fs::read_to_string(&path) {
            Ok(buf) => Ok(serde_json::from_str(&buf)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::PageNotFound(page_id)),
            Err(err) => Err(err.into()),
        }
    }

    fn write_page(&self, page: &Page) -> StoreResult<()> {
        let dir = self.notebook_dir(page.notebook_id);
        fs::create_dir_all(&dir)?;
        let path = self.page_path(page.notebook_id, page.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(page)?)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn read_notebook(&self, notebook_id: NotebookId) -> StoreResult<NotebookPages> {
        let dir = self.notebook_dir(notebook_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(err.into()),
        };
        let mut pages = HashMap::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let page: Page = serde_json::from_str(&fs::read_to_string(&path)?)?;
            pages.insert(page.id, page);
        }
        Ok(pages)
    }

    fn modify(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
        f: impl FnOnce(&mut Page),
    ) -> StoreResult<Page> {
        let mut page = self.read_page(notebook_id, page_id)?;
        f(&mut page);
        self.write_page(&page)?;
        Ok(page)
    }
}

#[async_trait]
impl PageStore for FilePageStore {
    #[instrument(skip(self))]
    async fn list_pages(&self, notebook_id: NotebookId) -> StoreResult<Vec<Page>> {
        Ok(visible_sorted(&self.read_notebook(notebook_id)?))
    }

    async fn get_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page> {
        self.read_page(notebook_id, page_id)
    }

    #[instrument(skip(self, new_page), fields(title = %new_page.title))]
    async fn create_page(&self, notebook_id: NotebookId, new_page: NewPage) -> StoreResult<Page> {
        let pages = self.read_notebook(notebook_id)?;
        let page = build_page(&pages, notebook_id, new_page);
        self.write_page(&page)?;
        Ok(page)
    }

    async fn update_page(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
        update: PageUpdate,
    ) -> StoreResult<Page> {
        self.modify(notebook_id, page_id, |page| page.apply_update(&update))
    }

    async fn delete_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<()> {
        self.modify(notebook_id, page_id, |page| page.deleted_at = Some(Utc::now()))
            .map(|_| ())
    }

    async fn restore_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page> {
        self.modify(notebook_id, page_id, |page| page.deleted_at = None)
    }

    async fn permanent_delete_page(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
    ) -> StoreResult<()> {
        match fs::remove_file(self.page_path(notebook_id, page_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::PageNotFound(page_id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn move_page_to_parent(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
        parent_page_id: Option<PageId>,
        position: Option<i32>,
    ) -> StoreResult<Page> {
        let mut pages = self.read_notebook(notebook_id)?;
        let moved = move_to_parent(&mut pages, page_id, parent_page_id, position)?;
        self.write_page(&moved)?;
        Ok(moved)
    }

    async fn reorder_pages(&self, notebook_id: NotebookId, ordered: &[PageId]) -> StoreResult<()> {
        let mut pages = self.read_notebook(notebook_id)?;
        for page in reorder(&mut pages, ordered)? {
            self.write_page(&page)?;
        }
        Ok(())
    }

    async fn archive_page(&self, notebook_id: NotebookId, page_id: PageId) -> StoreResult<Page> {
        self.modify(notebook_id, page_id, |page| page.is_archived = true)
    }

    async fn unarchive_page(
        &self,
        notebook_id: NotebookId,
        page_id: PageId,
    ) -> StoreResult<Page> {
        self.modify(notebook_id, page_id, |page| page.is_archived = false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[tokio::test]
    async fn memory_store_soft_delete_hides_page_from_listing() {
        let store = MemoryPageStore::new();
        let notebook = Uuid::new_v4();
        let a = store.create_page(notebook, NewPage::titled("A")).await.unwrap();
        let b = store.create_page(notebook, NewPage::titled("B")).await.unwrap();
        assert_eq!(b.position, a.position + 1);

        store.delete_page(notebook, a.id).await.unwrap();
        let listed = store.list_pages(notebook).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, b.id);

        let deleted = store.get_page(notebook, a.id).await.unwrap();
        assert!(deleted.is_deleted());
        let restored = store.restore_page(notebook, a.id).await.unwrap();
        assert!(!restored.is_deleted());
    }

    #[tokio::test]
    async fn memory_store_reads_do_not_create_notebooks() {
        let store = MemoryPageStore::new();
        let unknown = Uuid::new_v4();

        assert!(store.list_pages(unknown).await.unwrap().is_empty());
        let err = store.get_page(unknown, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::PageNotFound(_)));
        store.reorder_pages(unknown, &[]).await.unwrap();
        assert_eq!(store.notebook_count(), 0);

        store.create_page(unknown, NewPage::titled("First")).await.unwrap();
        assert_eq!(store.notebook_count(), 1);
        assert_eq!(store.list_pages(unknown).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn move_rejects_cycles() {
        let store = MemoryPageStore::new();
        let notebook = Uuid::new_v4();
        let parent = store.create_page(notebook, NewPage::titled("Parent")).await.unwrap();
        let child = store.create_page(notebook, NewPage::titled("Child")).await.unwrap();

        let moved = store
            .move_page_to_parent(notebook, child.id, Some(parent.id), Some(3))
            .await
            .unwrap();
        assert_eq!(moved.parent_page_id, Some(parent.id));
        assert_eq!(moved.position, 3);

        let err = store
            .move_page_to_parent(notebook, parent.id, Some(child.id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidMove(_)));
        let err = store
            .move_page_to_parent(notebook, parent.id, Some(parent.id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidMove(_)));
    }

    #[tokio::test]
    async fn file_store_round_trips_pages_on_disk() {
        let dir = tempdir().unwrap();
        let store = FilePageStore::new(dir.path().join("pages")).unwrap();
        let notebook = Uuid::new_v4();

        let first = store.create_page(notebook, NewPage::titled("First")).await.unwrap();
        let second = store.create_page(notebook, NewPage::titled("Second")).await.unwrap();
        store
            .update_page(notebook, first.id, PageUpdate::favorite(true))
            .await
            .unwrap();
        store
            .reorder_pages(notebook, &[second.id, first.id])
            .await
            .unwrap();

        let reopened = FilePageStore::new(dir.path().join("pages")).unwrap();
        let listed = reopened.list_pages(notebook).await.unwrap();
        assert_eq!(
            listed.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        assert!(listed[1].is_favorite);

        store.archive_page(notebook, second.id).await.unwrap();
        assert_eq!(reopened.list_pages(notebook).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_store_reports_missing_pages() {
        let dir = tempdir().unwrap();
        let store = FilePageStore::new(dir.path().to_path_buf()).unwrap();
        let missing = Uuid::new_v4();
        let err = store.get_page(Uuid::new_v4(), missing).await.unwrap_err();
        assert!(matches!(err, StoreError::PageNotFound(id) if id == missing));
        assert_eq!(err.user_message(), "Page no longer exists");
    }
}
