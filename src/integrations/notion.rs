use super::{check, parse_timestamp};
use crate::config::{NotionConfig, StatusKind};
use crate::error::SyncError;
use crate::models::{Store, Task};
use crate::sync::TaskStore;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;
/// Notion rejects rich-text fragments longer than this.
const RICH_TEXT_LIMIT: usize = 2000;

#[derive(Serialize)]
struct QueryRequest<'a> {
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_cursor: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

/// A Notion database used as a task list.
pub struct NotionTasks {
    client: Client,
    api_base: String,
    api_key: String,
    database_id: String,
    schema: NotionConfig,
}

impl NotionTasks {
    pub fn connect(config: &NotionConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(5)))
            .build()?;
        Self::new(client, NOTION_API, config)
    }

    pub fn new(client: Client, api_base: &str, config: &NotionConfig) -> Result<Self, SyncError> {
        let api_key = config.resolved_api_key();
        let database_id = config.resolved_database_id();
        if api_key.is_empty() || database_id.is_empty() {
            return Err(SyncError::Config(
                "Notion api_key/database_id required in config.toml or environment".to_string(),
            ));
        }
        if config.title_property.trim().is_empty() {
            return Err(SyncError::Config(
                "notion.title_property must name the database's title column".to_string(),
            ));
        }
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            database_id,
            schema: config.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.api_base))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
    }

    fn task_from_page(&self, page: &Value) -> Result<Task, SyncError> {
        let Some(id) = page.get("id").and_then(Value::as_str) else {
            return Err(SyncError::Malformed {
                store: Store::Notion,
                detail: "page without id".to_string(),
            });
        };
        let empty = Map::new();
        let properties = page
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let property = |name: &str| {
            if name.is_empty() {
                None
            } else {
                properties.get(name)
            }
        };

        let title = property(&self.schema.title_property)
            .and_then(|p| p.get("title"))
            .map(plain_text)
            .unwrap_or_default();
        let status_name = property(&self.schema.status_property).and_then(|p| {
            p.get("select")
                .filter(|v| !v.is_null())
                .or_else(|| p.get("status"))
                .and_then(|v| v.get("name"))
                .and_then(Value::as_str)
        });
        let due_date = property(&self.schema.due_property)
            .and_then(|p| p.get("date"))
            .and_then(|d| d.get("start"))
            .and_then(Value::as_str)
            .and_then(parse_notion_date);
        let description = property(&self.schema.description_property)
            .and_then(|p| p.get("rich_text"))
            .map(plain_text)
            .filter(|text| !text.is_empty());

        Ok(Task {
            title,
            completed: status_name == Some(self.schema.completed_status.as_str()),
            due_date,
            description,
            notion_id: Some(id.to_string()),
            google_id: None,
            last_modified: page
                .get("last_edited_time")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
        })
    }

    fn properties_for(&self, task: &Task) -> Value {
        let schema = &self.schema;
        let mut properties = Map::new();
        properties.insert(
            schema.title_property.clone(),
            json!({ "title": rich_text(&task.title) }),
        );

        if !schema.status_property.is_empty() {
            let name = if task.completed {
                &schema.completed_status
            } else {
                &schema.pending_status
            };
            let kind = match schema.status_kind {
                StatusKind::Select => "select",
                StatusKind::Status => "status",
            };
            let mut value = Map::new();
            value.insert(kind.to_string(), json!({ "name": name }));
            properties.insert(schema.status_property.clone(), Value::Object(value));
        }

        if !schema.due_property.is_empty() {
            let date = task
                .due_date
                .map(|due| json!({ "start": format_notion_date(due) }))
                .unwrap_or(Value::Null);
            properties.insert(schema.due_property.clone(), json!({ "date": date }));
        }

        if !schema.description_property.is_empty() {
            properties.insert(
                schema.description_property.clone(),
                json!({ "rich_text": rich_text(task.description_text()) }),
            );
        }

        Value::Object(properties)
    }

    fn read_page(&self, resp: reqwest::blocking::Response, action: &'static str) -> Result<Task, SyncError> {
        let page: Value = check(resp, Store::Notion, action)?.json()?;
        self.task_from_page(&page)
    }
}

impl TaskStore for NotionTasks {
    fn store(&self) -> Store {
        Store::Notion
    }

    fn fetch_all(&mut self) -> Result<Vec<Task>, SyncError> {
        let path = format!("/databases/{}/query", self.database_id);
        let mut tasks = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let body = QueryRequest {
                page_size: PAGE_SIZE,
                start_cursor: cursor.as_deref(),
            };
            let resp = self.request(Method::POST, &path).json(&body).send()?;
            let page: QueryResponse = check(resp, Store::Notion, "database query")?.json()?;

            for result in &page.results {
                match self.task_from_page(result) {
                    Ok(task) => tasks.push(task),
                    Err(err) => log::warn!(
                        "skipping Notion page {}: {err}",
                        result.get("id").and_then(Value::as_str).unwrap_or("?")
                    ),
                }
            }

            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tasks)
    }

    fn create(&mut self, task: &Task) -> Result<Task, SyncError> {
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": self.properties_for(task),
        });
        let resp = self.request(Method::POST, "/pages").json(&body).send()?;
        self.read_page(resp, "page create")
    }

    fn update(&mut self, task: &Task) -> Result<Task, SyncError> {
        let Some(page_id) = task.notion_id.as_deref() else {
            return Err(SyncError::MissingId {
                store: Store::Notion,
            });
        };
        let body = json!({ "properties": self.properties_for(task) });
        let resp = self
            .request(Method::PATCH, &format!("/pages/{page_id}"))
            .json(&body)
            .send()?;
        self.read_page(resp, "page update")
    }
}

/// Concatenated `plain_text` of a rich-text array.
fn plain_text(value: &Value) -> String {
    value
        .as_array()
        .map(|fragments| {
            fragments
                .iter()
                .filter_map(|fragment| {
                    fragment
                        .get("plain_text")
                        .or_else(|| fragment.get("text").and_then(|t| t.get("content")))
                        .and_then(Value::as_str)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn rich_text(content: &str) -> Value {
    let chars: Vec<char> = content.chars().collect();
    let fragments: Vec<Value> = chars
        .chunks(RICH_TEXT_LIMIT)
        .map(|chunk| {
            let text: String = chunk.iter().collect();
            json!({ "type": "text", "text": { "content": text } })
        })
        .collect();
    Value::Array(fragments)
}

/// Date-only values become midnight UTC.
fn parse_notion_date(value: &str) -> Option<DateTime<Utc>> {
    if let Some(ts) = parse_timestamp(value) {
        return Some(ts);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

fn format_notion_date(value: DateTime<Utc>) -> String {
    if value.time() == NaiveTime::MIN {
        value.format("%Y-%m-%d").to_string()
    } else {
        value.to_rfc3339()
    }
}
