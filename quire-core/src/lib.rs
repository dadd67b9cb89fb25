//! Pane and tab workspace for a notebook editor.
//!
//! [`Workspace`] owns a list of panes, each holding ordered tabs over notebook
//! pages, together with a recently visited list and a cache of page records
//! fetched from a [`PageStore`]. The layout survives restarts through a
//! [`WorkspaceStateStore`].

pub mod cache;
pub mod config;
pub mod page;
pub mod pane;
pub mod persist;
pub mod recent;
pub mod registry;
pub mod state;
pub mod store;
pub mod workspace;

pub use cache::{PageCache, RefreshToken};
pub use config::WorkspaceConfig;
pub use page::{NewPage, NotebookId, Page, PageId, PageUpdate};
pub use pane::{Pane, PaneId, Tab};
pub use persist::{
    load_state, FileWorkspaceStore, MemoryWorkspaceStore, WorkspaceSnapshot, WorkspaceStateStore,
    SNAPSHOT_VERSION,
};
pub use recent::{RecentPageEntry, RecentPages, DEFAULT_RECENT_CAPACITY};
pub use registry::PaneRegistry;
pub use state::{Action, Effect, TabSeed, WorkspaceState};
pub use store::{
    FilePageStore, MemoryPageStore, NullIndexer, PageIndexer, PageStore, StoreError, StoreResult,
};
pub use workspace::{Workspace, WorkspaceEvent};
