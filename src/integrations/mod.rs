pub mod google;
pub mod notion;

use crate::error::SyncError;
use crate::models::Store;
use chrono::{DateTime, Utc};
use reqwest::blocking::Response;

/// Passes successful responses through and turns the rest into
/// [`SyncError::Remote`] with a trimmed copy of the body.
pub(crate) fn check(
    resp: Response,
    store: Store,
    action: &'static str,
) -> Result<Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(SyncError::Remote {
        store,
        action,
        status: status.as_u16(),
        detail: truncate_error(body.trim()),
    })
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn truncate_error(message: &str) -> String {
    let mut out = message.replace(['\n', '\r'], " ");
    if out.len() > 240 {
        let mut cut = 240;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str("...");
    }
    out
}
