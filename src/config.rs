use crate::error::SyncError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "tasklink", "tasklink")
}

pub fn default_data_dir() -> PathBuf {
    if let Some(path) = std::env::var_os("TASKLINK_DATA_DIR") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.data_dir().to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".tasklink")
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("TASKLINK_CONFIG") {
        return PathBuf::from(path);
    }
    if let Some(dirs) = project_dirs() {
        return dirs.config_dir().join("config.toml");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".tasklink-config.toml")
}

pub fn sync_state_path(config: &Config) -> PathBuf {
    if config.sync.state_path.as_os_str().is_empty() {
        default_data_dir().join("sync_state.json")
    } else {
        config.sync.state_path.clone()
    }
}

pub fn google_token_path() -> PathBuf {
    default_data_dir().join("google_token.json")
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub notion: NotionConfig,
    pub google: GoogleConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    #[default]
    Select,
    Status,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NotionConfig {
    pub api_key: String,
    pub database_id: String,
    pub title_property: String,
    pub status_property: String,
    pub status_kind: StatusKind,
    pub completed_status: String,
    pub pending_status: String,
    pub due_property: String,
    /// Rich-text property holding the description. Empty when the database has none.
    pub description_property: String,
    pub timeout_seconds: u64,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            database_id: String::new(),
            title_property: "Task Name".to_string(),
            status_property: "Status".to_string(),
            status_kind: StatusKind::Select,
            completed_status: "Completed".to_string(),
            pending_status: "Not Started".to_string(),
            due_property: "Due Date".to_string(),
            description_property: String::new(),
            timeout_seconds: 30,
        }
    }
}

impl NotionConfig {
    pub fn resolved_api_key(&self) -> String {
        resolve(&self.api_key, &["NOTION_API_KEY"])
    }

    pub fn resolved_database_id(&self) -> String {
        resolve(&self.database_id, &["NOTION_DATABASE_ID"])
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub task_list: String,
    pub timeout_seconds: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            task_list: "My Tasks".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl GoogleConfig {
    pub fn resolved_client_id(&self) -> String {
        resolve(&self.client_id, &["GOOGLE_CLIENT_ID", "CLIENT_ID"])
    }

    pub fn resolved_client_secret(&self) -> String {
        resolve(&self.client_secret, &["GOOGLE_CLIENT_SECRET", "CLIENT_SECRET"])
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_seconds: u64,
    pub state_path: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            state_path: PathBuf::new(),
        }
    }
}

/// Config value if set, otherwise the first non-empty environment variable.
fn resolve(configured: &str, env_keys: &[&str]) -> String {
    if !configured.trim().is_empty() {
        return configured.trim().to_string();
    }
    env_keys
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

impl Config {
    pub fn load() -> Self {
        Self::load_from_path(&config_path())
    }

    pub fn load_from_path(config_path: &Path) -> Self {
        let mut config = if let Ok(content) = fs::read_to_string(config_path) {
            match toml::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!(
                        "Failed to parse config.toml ({config_path:?}), using defaults: {e}"
                    );
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        let changed = config.normalize_paths();

        if changed || !config_path.exists() {
            if let Err(e) = config.save_to_path(config_path) {
                log::debug!("could not write config to {config_path:?}: {e}");
            }
        }

        config
    }

    pub fn save_to_path(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, content)
    }

    /// Reports every missing credential at once.
    pub fn validate(&self) -> Result<(), SyncError> {
        let mut missing = Vec::new();
        if self.notion.resolved_api_key().is_empty() {
            missing.push("notion.api_key (NOTION_API_KEY)");
        }
        if self.notion.resolved_database_id().is_empty() {
            missing.push("notion.database_id (NOTION_DATABASE_ID)");
        }
        if self.google.resolved_client_id().is_empty() {
            missing.push("google.client_id (CLIENT_ID)");
        }
        if self.google.resolved_client_secret().is_empty() {
            missing.push("google.client_secret (CLIENT_SECRET)");
        }
        if self.notion.title_property.trim().is_empty() {
            missing.push("notion.title_property");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Config(format!(
                "Missing settings in config.toml or environment: {}",
                missing.join(", ")
            )))
        }
    }

    fn normalize_paths(&mut self) -> bool {
        if !self.sync.state_path.as_os_str().is_empty() && self.sync.state_path.is_relative() {
            self.sync.state_path = default_data_dir().join(&self.sync.state_path);
            return true;
        }
        false
    }
}
