use crate::models::Store;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Config(String),

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Request(String),

    /// The remote store answered with a non-success status.
    #[error("{store} {action} failed: HTTP {status}: {detail}")]
    Remote {
        store: Store,
        action: &'static str,
        status: u16,
        detail: String,
    },

    #[error("malformed {store} record: {detail}")]
    Malformed { store: Store, detail: String },

    #[error("cannot update a task without a {store} id")]
    MissingId { store: Store },

    /// Enumerating a store failed; the whole pass is abandoned.
    #[error("failed to fetch tasks from {store}: {source}")]
    Fetch {
        store: Store,
        #[source]
        source: Box<SyncError>,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn is_fatal_to_pass(&self) -> bool {
        matches!(self, SyncError::Fetch { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Request(err.to_string())
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
