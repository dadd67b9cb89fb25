use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PageId = Uuid;
pub type NotebookId = Uuid;

/// A page record as returned by the page store.
///
/// `content` is the editor document and is treated as opaque here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: PageId,
    pub notebook_id: NotebookId,
    pub title: String,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
    #[serde(default)]
    pub parent_page_id: Option<PageId>,
    #[serde(default)]
    pub section_id: Option<Uuid>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    pub fn new(notebook_id: NotebookId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            notebook_id,
            title: title.into(),
            content: serde_json::Value::Null,
            tags: Vec::new(),
            folder_id: None,
            parent_page_id: None,
            section_id: None,
            is_favorite: false,
            is_archived: false,
            position: 0,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Applies every field present in `update` and stamps `updated_at`.
    pub fn apply_update(&mut self, update: &PageUpdate) {
        if let Some(title) = &update.title {
            self.title = title.clone();
        }
        if let Some(content) = &update.content {
            self.content = content.clone();
        }
        if let Some(tags) = &update.tags {
            self.tags = tags.clone();
        }
        if let Some(is_favorite) = update.is_favorite {
            self.is_favorite = is_favorite;
        }
        if let Some(folder_id) = update.folder_id {
            self.folder_id = folder_id;
        }
        if let Some(parent_page_id) = update.parent_page_id {
            self.parent_page_id = parent_page_id;
        }
        if let Some(section_id) = update.section_id {
            self.section_id = section_id;
        }
        if let Some(position) = update.position {
            self.position = position;
        }
        self.updated_at = Utc::now();
    }
}

/// Fields accepted by `PageStore::create_page`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPage {
    pub title: String,
    pub folder_id: Option<Uuid>,
    pub parent_page_id: Option<PageId>,
    pub section_id: Option<Uuid>,
}

impl NewPage {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// A partial update. `None` leaves the field untouched; for the nullable
/// hierarchy fields `Some(None)` clears them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUpdate {
    pub title: Option<String>,
    pub content: Option<serde_json::Value>,
    pub tags: Option<Vec<String>>,
    pub is_favorite: Option<bool>,
    pub folder_id: Option<Option<Uuid>>,
    pub parent_page_id: Option<Option<PageId>>,
    pub section_id: Option<Option<Uuid>>,
    pub position: Option<i32>,
}

impl PageUpdate {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn favorite(is_favorite: bool) -> Self {
        Self {
            is_favorite: Some(is_favorite),
            ..Self::default()
        }
    }
}
