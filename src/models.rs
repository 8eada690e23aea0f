use chrono::{DateTime, Utc};
use std::fmt;

/// One of the two task stores kept in agreement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Store {
    Notion,
    Google,
}

impl Store {
    pub fn other(self) -> Store {
        match self {
            Store::Notion => Store::Google,
            Store::Google => Store::Notion,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Store::Notion => "Notion",
            Store::Google => "Google Tasks",
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as seen by the synchronizer, whichever store it came from.
///
/// Adapters only ever fill in their own id. Pairing a task with its
/// counterpart is the synchronizer's job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Task {
    pub title: String,
    pub completed: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub notion_id: Option<String>,
    pub google_id: Option<String>,
    /// `None` when the store did not report it. Never treat as epoch.
    pub last_modified: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn id(&self, store: Store) -> Option<&str> {
        match store {
            Store::Notion => self.notion_id.as_deref(),
            Store::Google => self.google_id.as_deref(),
        }
    }

    pub fn set_id(&mut self, store: Store, id: impl Into<String>) {
        let id = Some(id.into());
        match store {
            Store::Notion => self.notion_id = id,
            Store::Google => self.google_id = id,
        }
    }

    /// Copy of this task addressed at `store`'s record `id`.
    pub fn linked_to(&self, store: Store, id: &str) -> Task {
        let mut task = self.clone();
        task.set_id(store, id);
        task
    }

    /// Copy carrying only the content fields, ready to be created in `store`.
    pub fn detached(&self) -> Task {
        Task {
            notion_id: None,
            google_id: None,
            last_modified: None,
            ..self.clone()
        }
    }

    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}
