use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::recent::DEFAULT_RECENT_CAPACITY;

/// Workspace settings, read from a TOML file.
///
/// ```toml
/// recent_capacity = 20
/// reset_panes_on_notebook_switch = false
/// state_file = "/home/me/.local/share/quire/workspace.json"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Maximum number of entries in the recent pages list.
    pub recent_capacity: usize,
    /// Close every pane when another notebook is opened. When off, panes keep
    /// their tabs across notebooks even though the pages are no longer cached.
    pub reset_panes_on_notebook_switch: bool,
    /// Where the pane layout is stored. Front ends pick a platform default
    /// when unset.
    pub state_file: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            reset_panes_on_notebook_switch: false,
            state_file: None,
        }
    }
}

impl WorkspaceConfig {
    /// Reads the config at `path`; a missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml(&raw).with_context(|| format!("failed to parse config file {:?}", path))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        if config.recent_capacity == 0 {
            config.recent_capacity = DEFAULT_RECENT_CAPACITY;
        }
        Ok(config)
    }
}
