//! User preferences persisted across runs
//!
//! One JSON document, loaded once at startup and rewritten on every change.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Entries kept in each recent list
const MAX_RECENT: usize = 10;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persisted preferences
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Snapshot size when a client does not ask for one
    pub tail_lines: usize,
    pub render_ansi_top_pane: bool,
    pub render_ansi_bottom_pane: bool,
    /// UI refresh preference; not used by the server itself
    pub polling_interval_ms: u64,
    /// Most recent first
    pub recent_files: Vec<String>,
    /// Most recent first
    pub recent_namespaces: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tail_lines: 1000,
            render_ansi_top_pane: true,
            render_ansi_bottom_pane: true,
            polling_interval_ms: 500,
            recent_files: Vec::new(),
            recent_namespaces: Vec::new(),
        }
    }
}

/// Partial update from the settings endpoint
///
/// Absent fields and non-positive numbers leave the current value alone.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsUpdate {
    pub tail_lines: Option<i64>,
    pub render_ansi_top_pane: Option<bool>,
    pub render_ansi_bottom_pane: Option<bool>,
    pub polling_interval_ms: Option<i64>,
}

/// Process-wide preferences store
pub struct SettingsStore {
    path: Option<PathBuf>,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    /// `<config dir>/weblogview/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("weblogview").join("settings.json"))
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or unreadable
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable settings file");
                Settings::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read settings file");
                Settings::default()
            }
        };

        Self {
            path: Some(path),
            settings: RwLock::new(settings),
        }
    }

    /// A store that never touches disk
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            settings: RwLock::new(Settings::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn tail_lines_default(&self) -> usize {
        self.settings.read().tail_lines
    }

    pub fn recent_files(&self) -> Vec<String> {
        self.settings.read().recent_files.clone()
    }

    pub fn recent_namespaces(&self) -> Vec<String> {
        self.settings.read().recent_namespaces.clone()
    }

    pub fn add_recent_file(&self, path: &str) -> Result<(), SettingsError> {
        self.mutate(|settings| push_recent(&mut settings.recent_files, path))
    }

    pub fn add_recent_namespace(&self, namespace: &str) -> Result<(), SettingsError> {
        if namespace.is_empty() {
            return Ok(());
        }
        self.mutate(|settings| push_recent(&mut settings.recent_namespaces, namespace))
    }

    /// Apply a partial update and return the resulting settings
    pub fn update(&self, update: SettingsUpdate) -> Result<Settings, SettingsError> {
        self.mutate(|settings| {
            if let Some(lines) = update.tail_lines.filter(|n| *n > 0) {
                settings.tail_lines = usize::try_from(lines).unwrap_or(usize::MAX);
            }
            if let Some(render) = update.render_ansi_top_pane {
                settings.render_ansi_top_pane = render;
            }
            if let Some(render) = update.render_ansi_bottom_pane {
                settings.render_ansi_bottom_pane = render;
            }
            if let Some(ms) = update.polling_interval_ms.filter(|n| *n > 0) {
                settings.polling_interval_ms = ms.unsigned_abs();
            }
        })?;
        Ok(self.get())
    }

    /// Change settings and write them out while still holding the lock
    fn mutate(&self, change: impl FnOnce(&mut Settings)) -> Result<(), SettingsError> {
        let mut settings = self.settings.write();
        change(&mut settings);

        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&*settings)?)?;
        debug!(path = %path.display(), "Saved settings");
        Ok(())
    }
}

fn push_recent(list: &mut Vec<String>, item: &str) {
    list.retain(|existing| existing != item);
    list.insert(0, item.to_string());
    list.truncate(MAX_RECENT);
}
