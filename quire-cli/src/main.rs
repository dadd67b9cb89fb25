use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use quire_core::{
    FilePageStore, FileWorkspaceStore, NewPage, NullIndexer, PageId, PageStore, PaneId, Workspace,
    WorkspaceConfig, WorkspaceStateStore,
};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "quire",
    version,
    about = "Pane and tab workspace for Quire notebooks"
)]
struct Args {
    /// Directory holding pages, the workspace layout and logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Notebook to work in
    #[arg(long, global = true, default_value_t = Uuid::nil())]
    notebook: Uuid,

    #[command(subcommand)]
    command: Cmd,
}

/// Pages are named by id or exact title, panes by id or 1-based number.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Create a page in the notebook
    NewPage { title: String },
    /// List the notebook's pages
    Pages,
    /// Open a page in the active pane
    Open {
        page: String,
        /// Open in this pane instead of the active one
        #[arg(long, conflicts_with = "new_pane")]
        pane: Option<String>,
        /// Open in a new pane
        #[arg(long)]
        new_pane: bool,
    },
    /// Make an open tab current
    Select { pane: String, page: String },
    /// Copy a pane's current tab into a new pane next to it
    Split { pane: Option<String> },
    ClosePane { pane: String },
    CloseTab { pane: String, page: String },
    /// Close every unpinned tab except one
    CloseOthers { pane: String, page: String },
    /// Close every unpinned tab
    CloseAll { pane: String },
    Pin { pane: String, page: String },
    Unpin { pane: String, page: String },
    /// Make a pane the active one
    Focus { pane: String },
    /// Toggle the favorite flag of a page
    Favorite { page: String },
    Rename { page: String, title: String },
    /// Move a page to the trash
    Delete { page: String },
    /// List recently visited pages
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    ClearRecent,
    /// Print the pane layout
    Show,
}

enum Output {
    Layout,
    Pages,
    Recent(usize),
    Created(PageId),
}

struct Paths {
    data_dir: PathBuf,
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let paths = resolve_paths(&args)?;
    let _log_guard = init_logging(&paths.data_dir.join("logs"))?;

    let config = WorkspaceConfig::load(&paths.config_file)?;
    let state_file = config
        .state_file
        .clone()
        .unwrap_or_else(|| paths.data_dir.join("workspace.json"));
    let store: Arc<dyn PageStore> = Arc::new(
        FilePageStore::new(paths.data_dir.join("pages")).context("failed to open page store")?,
    );
    let layout: Arc<dyn WorkspaceStateStore> = Arc::new(FileWorkspaceStore::new(state_file)?);
    let mut workspace = Workspace::new(store, Arc::new(NullIndexer), layout, config)?;
    workspace
        .open_notebook(args.notebook)
        .await
        .with_context(|| format!("failed to load notebook {}", args.notebook))?;

    let result = run(&mut workspace, args.command).await;
    workspace.settle().await;
    let output = result?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match output {
        Output::Layout => write_layout(&mut out, &workspace)?,
        Output::Pages => write_pages(&mut out, &workspace)?,
        Output::Recent(limit) => write_recent(&mut out, &workspace, limit)?,
        Output::Created(page_id) => {
            let title = workspace.page(page_id).map(|p| p.title).unwrap_or_default();
            writeln!(out, "{page_id}  {title}")?;
        }
    }
    Ok(())
}

async fn run(workspace: &mut Workspace, command: Cmd) -> Result<Output> {
    debug!(?command, "running command");
    match command {
        Cmd::NewPage { title } => {
            let page = workspace.create_page(NewPage::titled(title)).await?;
            return Ok(Output::Created(page.id));
        }
        Cmd::Pages => return Ok(Output::Pages),
        Cmd::Recent { limit } => return Ok(Output::Recent(limit)),
        Cmd::Open {
            page,
            pane,
            new_pane,
        } => {
            let page_id = resolve_page(workspace, &page)?;
            if new_pane {
                workspace.open_in_new_pane(Some(page_id));
            } else if let Some(pane) = pane {
                let pane_id = resolve_pane(workspace, &pane)?;
                workspace.open_in_pane(pane_id, Some(page_id));
            } else {
                workspace.open_page(page_id);
            }
        }
        Cmd::Select { pane, page } => {
            let (pane_id, page_id) = resolve_tab(workspace, &pane, &page)?;
            workspace.select_tab(pane_id, page_id);
        }
        Cmd::Split { pane } => {
            let pane_id = match pane {
                Some(pane) => resolve_pane(workspace, &pane)?,
                None => workspace.active_pane_id(),
            };
            workspace.split_pane(pane_id);
        }
        Cmd::ClosePane { pane } => {
            let pane_id = resolve_pane(workspace, &pane)?;
            workspace.close_pane(pane_id);
        }
        Cmd::CloseTab { pane, page } => {
            let (pane_id, page_id) = resolve_tab(workspace, &pane, &page)?;
            workspace.close_tab(pane_id, page_id);
        }
        Cmd::CloseOthers { pane, page } => {
            let (pane_id, page_id) = resolve_tab(workspace, &pane, &page)?;
            workspace.close_other_tabs(pane_id, page_id);
        }
        Cmd::CloseAll { pane } => {
            let pane_id = resolve_pane(workspace, &pane)?;
            workspace.close_all_tabs(pane_id);
        }
        Cmd::Pin { pane, page } => {
            let (pane_id, page_id) = resolve_tab(workspace, &pane, &page)?;
            workspace.pin_tab(pane_id, page_id);
        }
        Cmd::Unpin { pane, page } => {
            let (pane_id, page_id) = resolve_tab(workspace, &pane, &page)?;
            workspace.unpin_tab(pane_id, page_id);
        }
        Cmd::Focus { pane } => {
            let pane_id = resolve_pane(workspace, &pane)?;
            workspace.set_active_pane(pane_id);
        }
        Cmd::Favorite { page } => {
            let page_id = resolve_page(workspace, &page)?;
            workspace.toggle_favorite(page_id).await?;
            return Ok(Output::Pages);
        }
        Cmd::Rename { page, title } => {
            let page_id = resolve_page(workspace, &page)?;
            workspace.rename_page(page_id, &title).await?;
        }
        Cmd::Delete { page } => {
            let page_id = resolve_page(workspace, &page)?;
            workspace.delete_page(page_id).await?;
        }
        Cmd::ClearRecent => workspace.clear_recent(),
        Cmd::Show => {}
    }
    Ok(Output::Layout)
}

fn resolve_paths(args: &Args) -> Result<Paths> {
    let project_dirs = || {
        ProjectDirs::from("net", "quire", "quire")
            .ok_or_else(|| anyhow!("unable to resolve platform data directories"))
    };
    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => project_dirs()?.data_local_dir().to_path_buf(),
    };
    let config_file = match &args.config {
        Some(path) => path.clone(),
        None => project_dirs()?.config_dir().join("quire.toml"),
    };
    Ok(Paths {
        data_dir,
        config_file,
    })
}

fn resolve_page(workspace: &Workspace, raw: &str) -> Result<PageId> {
    if let Ok(id) = Uuid::parse_str(raw) {
        return Ok(id);
    }
    let matches: Vec<PageId> = workspace
        .cached_pages()
        .into_iter()
        .filter(|p| p.title == raw)
        .map(|p| p.id)
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no page titled {raw:?}"),
        _ => bail!("several pages are titled {raw:?}, use the page id"),
    }
}

fn resolve_pane(workspace: &Workspace, raw: &str) -> Result<PaneId> {
    if let Ok(id) = Uuid::parse_str(raw) {
        return Ok(id);
    }
    let number: usize = raw
        .parse()
        .with_context(|| format!("expected a pane number or id, got {raw:?}"))?;
    number
        .checked_sub(1)
        .and_then(|index| workspace.panes().get(index))
        .map(|pane| pane.id())
        .ok_or_else(|| anyhow!("there is no pane {number}"))
}

/// Resolves a page against the tabs of `pane` first, so pages of another
/// notebook that are still open can be addressed by title.
fn resolve_tab(workspace: &Workspace, pane: &str, page: &str) -> Result<(PaneId, PageId)> {
    let pane_id = resolve_pane(workspace, pane)?;
    let tab = workspace
        .pane(pane_id)
        .and_then(|p| p.tabs().iter().find(|t| t.title == page));
    let page_id = match tab {
        Some(tab) => tab.page_id,
        None => resolve_page(workspace, page)?,
    };
    Ok((pane_id, page_id))
}

fn write_layout(out: &mut impl Write, workspace: &Workspace) -> io::Result<()> {
    for (index, pane) in workspace.panes().iter().enumerate() {
        let active = if pane.id() == workspace.active_pane_id() { '*' } else { ' ' };
        writeln!(out, "{active} pane {} {}", index + 1, pane.id())?;
        for tab in pane.tabs() {
            let current = if pane.current_page_id() == Some(tab.page_id) { '>' } else { ' ' };
            let pinned = if tab.is_pinned { "[pinned] " } else { "" };
            writeln!(out, "    {current} {pinned}{}  {}", tab.title, tab.page_id)?;
        }
    }
    match workspace.selected_page_id() {
        Some(page_id) => {
            let title = workspace
                .page(page_id)
                .map(|p| p.title)
                .unwrap_or_else(|| "(not loaded)".to_string());
            writeln!(out, "selected: {title}  {page_id}")
        }
        None => writeln!(out, "selected: none"),
    }
}

fn write_pages(out: &mut impl Write, workspace: &Workspace) -> io::Result<()> {
    for page in workspace.cached_pages() {
        if page.is_deleted() || page.is_archived {
            continue;
        }
        let favorite = if page.is_favorite { " (favorite)" } else { "" };
        writeln!(out, "{}  {}{favorite}", page.id, page.title)?;
    }
    Ok(())
}

fn write_recent(out: &mut impl Write, workspace: &Workspace, limit: usize) -> io::Result<()> {
    for entry in workspace.recent_pages(limit) {
        writeln!(
            out,
            "{}  {}  {}",
            entry.accessed_at.format("%Y-%m-%d %H:%M"),
            entry.title,
            entry.page_id
        )?;
    }
    Ok(())
}

fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;

    let file_appender = tracing_appender::rolling::never(log_dir, "quire.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries command output
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
