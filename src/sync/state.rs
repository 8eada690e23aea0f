//! Persisted link table between Notion pages and Google tasks.
//!
//! The file is pretty-printed JSON with three top-level fields
//! (`notion_to_google`, `google_to_notion`, `last_sync`) so it stays easy to
//! diff by hand. Writes go to `<path>.tmp` first and are renamed into place.

use super::mapping::IdBijection;
use crate::error::{SyncError, io_err};
use crate::models::Store;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncState {
    pub links: IdBijection,
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Id of the record paired with `id`, where `id` belongs to `from`.
    pub fn counterpart(&self, from: Store, id: &str) -> Option<&str> {
        match from {
            Store::Notion => self.links.get_forward(id),
            Store::Google => self.links.get_backward(id),
        }
    }

    pub fn link(&mut self, from: Store, source_id: &str, target_id: &str) {
        match from {
            Store::Notion => self.links.insert_pair(source_id, target_id),
            Store::Google => self.links.insert_pair(target_id, source_id),
        }
    }

    fn from_file(file: SyncStateFile) -> Self {
        let mut links = IdBijection::new();
        for (notion_id, google_id) in &file.notion_to_google {
            links.insert_pair(notion_id.as_str(), google_id.as_str());
        }

        // Several Notion ids pointing at one Google id collapse to the last one.
        let mut disagreements = file.notion_to_google.len() - links.len();
        for (google_id, notion_id) in &file.google_to_notion {
            if links.get_backward(google_id) == Some(notion_id.as_str()) {
                continue;
            }
            if links.get_backward(google_id).is_none() && links.get_forward(notion_id).is_none() {
                links.insert_pair(notion_id.as_str(), google_id.as_str());
            } else {
                disagreements += 1;
            }
        }
        if disagreements > 0 {
            log::warn!(
                "sync state maps disagreed ({disagreements} conflicting entries); kept notion_to_google"
            );
        }

        let last_sync = file.last_sync.as_deref().and_then(|raw| {
            let parsed = parse_last_sync(raw);
            if parsed.is_none() {
                log::warn!("ignoring unreadable last_sync value {raw:?}");
            }
            parsed
        });

        Self { links, last_sync }
    }

    fn to_file(&self) -> SyncStateFile {
        SyncStateFile {
            notion_to_google: self.links.forward().clone(),
            google_to_notion: self.links.backward().clone(),
            last_sync: self.last_sync.map(|ts| ts.to_rfc3339()),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct SyncStateFile {
    notion_to_google: BTreeMap<String, String>,
    google_to_notion: BTreeMap<String, String>,
    last_sync: Option<String>,
}

/// Accepts RFC 3339, or a naive ISO-8601 timestamp read as local time.
fn parse_last_sync(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Handle on the state file. The location is injected so tests never touch
/// the user's real state.
#[derive(Clone, Debug)]
pub struct SyncStateStore {
    path: PathBuf,
}

impl SyncStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing, unreadable or corrupt file yields empty state.
    pub fn load(&self) -> SyncState {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return SyncState::default(),
            Err(err) => {
                log::warn!(
                    "could not read sync state {}, starting fresh: {err}",
                    self.path.display()
                );
                return SyncState::default();
            }
        };

        match serde_json::from_str::<SyncStateFile>(&content) {
            Ok(file) => SyncState::from_file(file),
            Err(err) => {
                log::warn!(
                    "could not parse sync state {}, starting fresh: {err}",
                    self.path.display()
                );
                SyncState::default()
            }
        }
    }

    pub fn save(&self, state: &SyncState) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let json = serde_json::to_string_pretty(&state.to_file())?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}
