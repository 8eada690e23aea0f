use super::{check, parse_timestamp, truncate_error};
use crate::config::{GoogleConfig, google_token_path};
use crate::error::{SyncError, io_err};
use crate::models::{Store, Task};
use crate::sync::TaskStore;
use chrono::{DateTime, Duration, Local, Utc};
use reqwest::{StatusCode, Url};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration as StdDuration;

const OAUTH_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TASKS_API: &str = "https://tasks.googleapis.com/tasks/v1";
const TASKS_SCOPE: &str = "https://www.googleapis.com/auth/tasks";
const AUTH_FLOW_MINUTES: i64 = 10;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskListsResponse {
    items: Option<Vec<RemoteTaskList>>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct RemoteTaskList {
    id: String,
    title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TasksListResponse {
    items: Option<Vec<RemoteTask>>,
    next_page_token: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
struct RemoteTask {
    id: String,
    title: Option<String>,
    notes: Option<String>,
    status: Option<String>,
    updated: Option<String>,
    due: Option<String>,
    #[serde(default)]
    deleted: bool,
}

/// Body for both insert and patch. `None` serializes as `null`, which clears
/// the field on patch.
#[derive(Serialize, Debug)]
struct TaskWriteRequest {
    title: String,
    notes: Option<String>,
    status: &'static str,
    due: Option<String>,
}

/// Where the adapter talks to. Tests point these at a local mock server.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub api_base: String,
    pub token_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: TASKS_API.to_string(),
            token_url: OAUTH_TOKEN_URL.to_string(),
        }
    }
}

/// One Google Tasks list, selected by title.
pub struct GoogleTasks {
    client: Client,
    endpoints: Endpoints,
    client_id: String,
    client_secret: String,
    token: StoredToken,
    token_path: PathBuf,
    task_list: String,
    task_list_id: Option<String>,
}

impl GoogleTasks {
    /// Builds the adapter, running the browser consent flow if no usable
    /// token is stored.
    pub fn connect(config: &GoogleConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_seconds.max(5)))
            .build()?;
        let endpoints = Endpoints::default();
        let token_path = google_token_path();
        let token = ensure_token(&client, &endpoints, config, &token_path)?;
        Ok(Self::new(client, endpoints, config, token, token_path))
    }

    pub fn new(
        client: Client,
        endpoints: Endpoints,
        config: &GoogleConfig,
        token: StoredToken,
        token_path: PathBuf,
    ) -> Self {
        Self {
            client,
            endpoints,
            client_id: config.resolved_client_id(),
            client_secret: config.resolved_client_secret(),
            token,
            token_path,
            task_list: config.task_list.clone(),
            task_list_id: None,
        }
    }

    /// Current access token, refreshed when it is about to expire.
    fn bearer(&mut self) -> Result<String, SyncError> {
        if self.token.expires_at > Utc::now().timestamp() + 60 {
            return Ok(self.token.access_token.clone());
        }
        log::debug!("refreshing Google access token");
        let refreshed = refresh_access_token(
            &self.client,
            &self.endpoints.token_url,
            &self.client_id,
            &self.client_secret,
            &self.token.refresh_token,
        )?;
        save_token(&self.token_path, &refreshed)?;
        self.token = refreshed;
        Ok(self.token.access_token.clone())
    }

    /// Id of the configured list, creating the list when it does not exist.
    fn task_list_id(&mut self) -> Result<String, SyncError> {
        if let Some(id) = &self.task_list_id {
            return Ok(id.clone());
        }

        let token = self.bearer()?;
        let url = format!("{}/users/@me/lists", self.endpoints.api_base);
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(&[("maxResults", "100")]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }
            let resp = check(request.send()?, Store::Google, "task list lookup")?;
            let body: TaskListsResponse = resp.json()?;
            for list in body.items.unwrap_or_default() {
                if list.title.as_deref() == Some(self.task_list.as_str()) {
                    self.task_list_id = Some(list.id.clone());
                    return Ok(list.id);
                }
            }
            match body.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        log::info!("creating Google task list {:?}", self.task_list);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&serde_json::json!({ "title": self.task_list }))
            .send()?;
        let created: RemoteTaskList = check(resp, Store::Google, "task list create")?.json()?;
        self.task_list_id = Some(created.id.clone());
        Ok(created.id)
    }
}

impl TaskStore for GoogleTasks {
    fn store(&self) -> Store {
        Store::Google
    }

    fn fetch_all(&mut self) -> Result<Vec<Task>, SyncError> {
        let list_id = self.task_list_id()?;
        let token = self.bearer()?;
        let url = format!("{}/lists/{list_id}/tasks", self.endpoints.api_base);
        let mut tasks = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(&url).bearer_auth(&token).query(&[
                ("showCompleted", "true"),
                ("showHidden", "true"),
                ("maxResults", "100"),
            ]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }
            let resp = check(request.send()?, Store::Google, "tasks list")?;
            let body: TasksListResponse = resp.json()?;

            for remote in body.items.unwrap_or_default() {
                if remote.deleted {
                    continue;
                }
                let id = remote.id.clone();
                match task_from_remote(remote) {
                    Ok(task) => tasks.push(task),
                    Err(err) => log::warn!("skipping Google task {id}: {err}"),
                }
            }

            match body.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(tasks)
    }

    fn create(&mut self, task: &Task) -> Result<Task, SyncError> {
        let list_id = self.task_list_id()?;
        let token = self.bearer()?;
        let url = format!("{}/lists/{list_id}/tasks", self.endpoints.api_base);
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&write_request(task))
            .send()?;
        let created: RemoteTask = check(resp, Store::Google, "task create")?.json()?;
        task_from_remote(created)
    }

    fn update(&mut self, task: &Task) -> Result<Task, SyncError> {
        let Some(task_id) = task.google_id.clone() else {
            return Err(SyncError::MissingId {
                store: Store::Google,
            });
        };
        let list_id = self.task_list_id()?;
        let token = self.bearer()?;
        let url = format!("{}/lists/{list_id}/tasks/{task_id}", self.endpoints.api_base);
        let resp = self
            .client
            .patch(url)
            .bearer_auth(token)
            .json(&write_request(task))
            .send()?;
        let updated: RemoteTask = check(resp, Store::Google, "task update")?.json()?;
        task_from_remote(updated)
    }
}

fn task_from_remote(remote: RemoteTask) -> Result<Task, SyncError> {
    if remote.id.trim().is_empty() {
        return Err(SyncError::Malformed {
            store: Store::Google,
            detail: "task without id".to_string(),
        });
    }
    Ok(Task {
        title: remote.title.unwrap_or_default(),
        completed: remote.status.as_deref() == Some("completed"),
        due_date: remote.due.as_deref().and_then(parse_timestamp),
        description: remote.notes.filter(|notes| !notes.is_empty()),
        notion_id: None,
        google_id: Some(remote.id),
        last_modified: remote.updated.as_deref().and_then(parse_timestamp),
    })
}

fn write_request(task: &Task) -> TaskWriteRequest {
    TaskWriteRequest {
        title: task.title.clone(),
        notes: task.description.clone().filter(|notes| !notes.is_empty()),
        status: if task.completed {
            "completed"
        } else {
            "needsAction"
        },
        // Google keeps only the date part of `due`.
        due: task
            .due_date
            .map(|due| due.format("%Y-%m-%dT00:00:00.000Z").to_string()),
    }
}

fn ensure_token(
    client: &Client,
    endpoints: &Endpoints,
    config: &GoogleConfig,
    token_path: &Path,
) -> Result<StoredToken, SyncError> {
    let client_id = config.resolved_client_id();
    let client_secret = config.resolved_client_secret();
    if client_id.is_empty() || client_secret.is_empty() {
        return Err(SyncError::Config(
            "Google client_id/client_secret required in config.toml or environment".to_string(),
        ));
    }

    if token_path.exists() {
        let stored = load_token(token_path)?;
        if stored.expires_at > Utc::now().timestamp() + 60 {
            return Ok(stored);
        }
        match refresh_access_token(
            client,
            &endpoints.token_url,
            &client_id,
            &client_secret,
            &stored.refresh_token,
        ) {
            Ok(updated) => {
                save_token(token_path, &updated)?;
                return Ok(updated);
            }
            Err(err) => log::warn!("Google token refresh failed, re-authorizing: {err}"),
        }
    }

    let session = start_local_oauth_flow(&client_id)?;
    let token = wait_for_authorization(client, endpoints, &client_id, &client_secret, &session)?;
    save_token(token_path, &token)?;
    Ok(token)
}

struct AuthSession {
    auth_url: String,
    listener: TcpListener,
    state: String,
    redirect_uri: String,
    expires_at: DateTime<Local>,
}

fn start_local_oauth_flow(client_id: &str) -> Result<AuthSession, SyncError> {
    let listener =
        TcpListener::bind("127.0.0.1:0").map_err(|e| SyncError::Auth(e.to_string()))?;
    let addr = listener
        .local_addr()
        .map_err(|e| SyncError::Auth(e.to_string()))?;
    let redirect_uri = format!("http://{addr}");
    let state = generate_state();
    let auth_url = build_auth_url(client_id, &redirect_uri, &state)?;

    Ok(AuthSession {
        auth_url,
        listener,
        state,
        redirect_uri,
        expires_at: Local::now() + Duration::minutes(AUTH_FLOW_MINUTES),
    })
}

fn build_auth_url(client_id: &str, redirect_uri: &str, state: &str) -> Result<String, SyncError> {
    let url = Url::parse_with_params(
        OAUTH_AUTH_URL,
        [
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", TASKS_SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ],
    )
    .map_err(|e| SyncError::Auth(e.to_string()))?;
    Ok(url.to_string())
}

/// Blocks until the browser redirect arrives or the session expires.
fn wait_for_authorization(
    client: &Client,
    endpoints: &Endpoints,
    client_id: &str,
    client_secret: &str,
    session: &AuthSession,
) -> Result<StoredToken, SyncError> {
    eprintln!("Sign in to Google to let tasklink manage your tasks:\n  {}", session.auth_url);
    if let Err(err) = open::that(&session.auth_url) {
        log::debug!("could not open browser: {err}");
    }

    session
        .listener
        .set_nonblocking(true)
        .map_err(|e| SyncError::Auth(e.to_string()))?;

    loop {
        if Local::now() >= session.expires_at {
            return Err(SyncError::Auth(format!(
                "no sign-in within {AUTH_FLOW_MINUTES} minutes"
            )));
        }
        match session.listener.accept() {
            Ok((mut stream, _addr)) => {
                return finish_consent(
                    client,
                    &endpoints.token_url,
                    client_id,
                    client_secret,
                    session,
                    &mut stream,
                );
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(StdDuration::from_millis(200));
            }
            Err(err) => return Err(SyncError::Auth(err.to_string())),
        }
    }
}

fn refresh_access_token(
    client: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<StoredToken, SyncError> {
    let token = request_token(
        client,
        token_url,
        "token refresh",
        &[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ],
    )?;
    // Google only rotates the refresh token occasionally.
    let refresh_token = token
        .refresh_token
        .clone()
        .unwrap_or_else(|| refresh_token.to_string());
    Ok(stored_token(token, refresh_token))
}

fn request_token(
    client: &Client,
    token_url: &str,
    action: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, SyncError> {
    let resp = client.post(token_url).form(form).send()?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(SyncError::Auth(format!(
            "{action} failed: {}",
            describe_token_error(status, &body)
        )));
    }
    Ok(resp.json()?)
}

fn stored_token(token: TokenResponse, refresh_token: String) -> StoredToken {
    StoredToken {
        access_token: token.access_token,
        refresh_token,
        expires_at: (Utc::now() + Duration::seconds(token.expires_in as i64)).timestamp(),
    }
}

fn load_token(path: &Path) -> Result<StoredToken, SyncError> {
    let content = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

fn save_token(path: &Path, token: &StoredToken) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let content = serde_json::to_string_pretty(token)?;
    fs::write(path, content).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Reads the browser's redirect, trades the code for tokens and tells the
/// browser how it went.
fn finish_consent(
    client: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    session: &AuthSession,
    stream: &mut TcpStream,
) -> Result<StoredToken, SyncError> {
    let auth_io = |e: io::Error| SyncError::Auth(e.to_string());
    stream.set_nonblocking(false).map_err(auth_io)?;
    stream
        .set_read_timeout(Some(StdDuration::from_secs(2)))
        .map_err(auth_io)?;
    let mut buf = [0u8; 8192];
    let read = stream.read(&mut buf).map_err(auth_io)?;
    let request = String::from_utf8_lossy(&buf[..read]);

    let outcome = parse_consent(&request, &session.state).and_then(|code| {
        exchange_code(
            client,
            token_url,
            client_id,
            client_secret,
            &code,
            &session.redirect_uri,
        )
    });

    let page = match &outcome {
        Ok(_) => "tasklink is connected to Google Tasks. You can close this tab.".to_string(),
        Err(err) => format!("tasklink could not finish Google sign-in: {err}"),
    };
    if let Err(err) = reply(stream, &page) {
        log::debug!("could not answer the browser: {err}");
    }
    outcome
}

/// Authorization code from the redirect request, once `state` checks out.
fn parse_consent(request: &str, expected_state: &str) -> Result<String, SyncError> {
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");
    let url = Url::parse("http://127.0.0.1/")
        .and_then(|base| base.join(target))
        .map_err(|e| SyncError::Auth(format!("unreadable redirect: {e}")))?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        let detail = match params.get("error_description") {
            Some(description) => format!("{error} ({description})"),
            None => error.clone(),
        };
        return Err(SyncError::Auth(format!("consent refused: {detail}")));
    }
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(SyncError::Auth("OAuth state mismatch, retry sign-in".to_string()));
    }
    params
        .get("code")
        .filter(|code| !code.is_empty())
        .cloned()
        .ok_or_else(|| SyncError::Auth("redirect carried no authorization code".to_string()))
}

fn exchange_code(
    client: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<StoredToken, SyncError> {
    let token = request_token(
        client,
        token_url,
        "code exchange",
        &[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ],
    )?;
    let Some(refresh_token) = token.refresh_token.clone() else {
        return Err(SyncError::Auth(
            "Google sent no refresh token; grant offline access and retry".to_string(),
        ));
    };
    Ok(stored_token(token, refresh_token))
}

fn reply(stream: &mut TcpStream, message: &str) -> io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{message}",
        message.len()
    )
}

fn generate_state() -> String {
    use rand::distributions::{Alphanumeric, DistString};
    Alphanumeric.sample_string(&mut rand::thread_rng(), 32)
}

/// One-line summary of a failed token endpoint call.
fn describe_token_error(status: StatusCode, body: &str) -> String {
    let code = status.as_u16();
    let body = body.trim();
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(TokenErrorResponse {
            error,
            error_description: Some(description),
        }) => format!("HTTP {code}: {description} ({error})"),
        Ok(TokenErrorResponse { error, .. }) => format!("HTTP {code}: {error}"),
        Err(_) if body.is_empty() => format!("HTTP {code}"),
        Err(_) => format!("HTTP {code}: {}", truncate_error(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;
    use tempfile::TempDir;

    fn live_token() -> StoredToken {
        StoredToken {
            access_token: "test-token".to_string(),
            refresh_token: "refresh-1".to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        }
    }

    fn adapter(server: &ServerGuard, token: StoredToken, token_path: PathBuf, list: &str) -> GoogleTasks {
        let config = GoogleConfig {
            client_id: "cid".to_string(),
            client_secret: "csecret".to_string(),
            task_list: list.to_string(),
            ..GoogleConfig::default()
        };
        let endpoints = Endpoints {
            api_base: server.url(),
            token_url: format!("{}/token", server.url()),
        };
        GoogleTasks::new(Client::new(), endpoints, &config, token, token_path)
    }

    fn mock_lists(server: &mut ServerGuard) -> mockito::Mock {
        server
            .mock("GET", "/users/@me/lists")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"items":[{"id":"other","title":"Groceries"},{"id":"L1","title":"My Tasks"}]}"#)
            .create()
    }

    #[test]
    fn fetch_all_follows_pages_and_maps_fields() {
        let mut server = Server::new();
        let tmp = TempDir::new().unwrap();
        let lists = mock_lists(&mut server);
        let first = server
            .mock("GET", "/lists/L1/tasks")
            .match_query(Matcher::Regex(
                "^showCompleted=true&showHidden=true&maxResults=100$".to_string(),
            ))
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(
                json!({
                    "items": [
                        {
                            "id": "g1",
                            "title": "Buy milk",
                            "notes": "oat, not dairy",
                            "status": "needsAction",
                            "updated": "2025-03-01T10:00:00.000Z",
                            "due": "2025-03-05T00:00:00.000Z"
                        },
                        { "id": "gone", "title": "Deleted", "deleted": true }
                    ],
                    "nextPageToken": "p2"
                })
                .to_string(),
            )
            .create();
        let second = server
            .mock("GET", "/lists/L1/tasks")
            .match_query(Matcher::UrlEncoded("pageToken".to_string(), "p2".to_string()))
            .with_status(200)
            .with_body(r#"{"items":[{"id":"g2","title":"Pay rent","status":"completed"}]}"#)
            .create();

        let mut google = adapter(&server, live_token(), tmp.path().join("token.json"), "My Tasks");
        let tasks = google.fetch_all().unwrap();

        lists.assert();
        first.assert();
        second.assert();
        assert_eq!(tasks.len(), 2);
        let milk = &tasks[0];
        assert_eq!(milk.google_id.as_deref(), Some("g1"));
        assert_eq!(milk.notion_id, None);
        assert_eq!(milk.title, "Buy milk");
        assert!(!milk.completed);
        assert_eq!(milk.description.as_deref(), Some("oat, not dairy"));
        assert_eq!(
            milk.last_modified,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(
            milk.due_date,
            Some(Utc.with_ymd_and_hms(2025, 3, 5, 0, 0, 0).unwrap())
        );
        let rent = &tasks[1];
        assert!(rent.completed);
        assert_eq!(rent.last_modified, None);
    }

    #[test]
    fn missing_task_list_is_created() {
        let mut server = Server::new();
        let tmp = TempDir::new().unwrap();
        let lists = server
            .mock("GET", "/users/@me/lists")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"items":[]}"#)
            .create();
        let create_list = server
            .mock("POST", "/users/@me/lists")
            .match_body(Matcher::Json(json!({ "title": "Work" })))
            .with_status(200)
            .with_body(r#"{"id":"L9","title":"Work"}"#)
            .create();
        let tasks = server
            .mock("GET", "/lists/L9/tasks")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{}")
            .create();

        let mut google = adapter(&server, live_token(), tmp.path().join("token.json"), "Work");
        let fetched = google.fetch_all().unwrap();

        assert!(fetched.is_empty());
        lists.assert();
        create_list.assert();
        tasks.assert();
    }

    #[test]
    fn create_sends_task_fields_and_returns_google_id() {
        let mut server = Server::new();
        let tmp = TempDir::new().unwrap();
        let _lists = mock_lists(&mut server);
        let create = server
            .mock("POST", "/lists/L1/tasks")
            .match_body(Matcher::Json(json!({
                "title": "Buy milk",
                "notes": null,
                "status": "completed",
                "due": "2025-03-05T00:00:00.000Z"
            })))
            .with_status(200)
            .with_body(
                r#"{"id":"g-new","title":"Buy milk","status":"completed","updated":"2025-03-02T08:00:00.000Z"}"#,
            )
            .create();

        let mut task = Task::new("Buy milk");
        task.completed = true;
        task.due_date = Some(Utc.with_ymd_and_hms(2025, 3, 5, 17, 30, 0).unwrap());
        let mut google = adapter(&server, live_token(), tmp.path().join("token.json"), "My Tasks");
        let created = google.create(&task).unwrap();

        create.assert();
        assert_eq!(created.google_id.as_deref(), Some("g-new"));
        assert!(created.last_modified.is_some());
    }

    #[test]
    fn update_requires_google_id() {
        let server = Server::new();
        let tmp = TempDir::new().unwrap();
        let mut google = adapter(&server, live_token(), tmp.path().join("token.json"), "My Tasks");

        let err = google.update(&Task::new("no id")).unwrap_err();

        assert!(matches!(err, SyncError::MissingId { store: Store::Google }));
    }

    #[test]
    fn rejected_update_reports_status() {
        let mut server = Server::new();
        let tmp = TempDir::new().unwrap();
        let _lists = mock_lists(&mut server);
        let _patch = server
            .mock("PATCH", "/lists/L1/tasks/g1")
            .with_status(400)
            .with_body(r#"{"error":{"message":"Invalid due date"}}"#)
            .create();

        let mut google = adapter(&server, live_token(), tmp.path().join("token.json"), "My Tasks");
        let task = Task::new("Bad").linked_to(Store::Google, "g1");
        let err = google.update(&task).unwrap_err();

        match err {
            SyncError::Remote { status, detail, .. } => {
                assert_eq!(status, 400);
                assert!(detail.contains("Invalid due date"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expired_token_is_refreshed_and_saved() {
        let mut server = Server::new();
        let tmp = TempDir::new().unwrap();
        let token_path = tmp.path().join("token.json");
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".to_string(),
                "refresh_token".to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","expires_in":3600}"#)
            .create();
        let lists = server
            .mock("GET", "/users/@me/lists")
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"{"items":[{"id":"L1","title":"My Tasks"}]}"#)
            .create();
        let _tasks = server
            .mock("GET", "/lists/L1/tasks")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{}")
            .create();

        let expired = StoredToken {
            expires_at: 0,
            ..live_token()
        };
        let mut google = adapter(&server, expired, token_path.clone(), "My Tasks");
        google.fetch_all().unwrap();

        refresh.assert();
        lists.assert();
        let saved = load_token(&token_path).unwrap();
        assert_eq!(saved.access_token, "fresh");
        assert_eq!(saved.refresh_token, "refresh-1");
    }

    #[test]
    fn write_request_marks_open_tasks_as_needs_action() {
        let mut task = Task::new("Call mom");
        task.description = Some(String::new());

        let body = serde_json::to_value(write_request(&task)).unwrap();

        assert_eq!(body["status"], "needsAction");
        assert!(body["notes"].is_null());
        assert!(body["due"].is_null());
    }

    #[test]
    fn consent_redirect_yields_decoded_code() {
        let request = "GET /?state=xyz&code=4%2F0Ab%2Bc&scope=tasks HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";

        assert_eq!(parse_consent(request, "xyz").unwrap(), "4/0Ab+c");
    }

    #[test]
    fn consent_redirect_with_wrong_state_is_rejected() {
        let request = "GET /?state=forged&code=abc HTTP/1.1\r\n\r\n";

        let err = parse_consent(request, "xyz").unwrap_err();

        assert!(err.to_string().contains("state mismatch"));
    }

    #[test]
    fn refused_consent_reports_the_reason() {
        let request =
            "GET /?error=access_denied&error_description=user+said+no&state=xyz HTTP/1.1\r\n\r\n";

        let err = parse_consent(request, "xyz").unwrap_err();

        assert!(matches!(err, SyncError::Auth(_)));
        assert!(err.to_string().contains("access_denied (user said no)"));
    }

    #[test]
    fn code_is_exchanged_for_a_stored_token() {
        let mut server = Server::new();
        let exchange = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".to_string(), "authorization_code".to_string()),
                Matcher::UrlEncoded("code".to_string(), "c0de".to_string()),
                Matcher::UrlEncoded("redirect_uri".to_string(), "http://127.0.0.1:1".to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"a2","expires_in":3600,"refresh_token":"r2"}"#)
            .create();
        let token_url = format!("{}/token", server.url());

        let token = exchange_code(&Client::new(), &token_url, "cid", "cs", "c0de", "http://127.0.0.1:1")
            .unwrap();

        exchange.assert();
        assert_eq!(token.access_token, "a2");
        assert_eq!(token.refresh_token, "r2");
        assert!(token.expires_at > Utc::now().timestamp());
    }

    #[test]
    fn code_exchange_without_refresh_token_fails() {
        let mut server = Server::new();
        let _exchange = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"a1","expires_in":3600}"#)
            .create();
        let token_url = format!("{}/token", server.url());

        let err = exchange_code(&Client::new(), &token_url, "cid", "cs", "c0de", "http://127.0.0.1:1")
            .unwrap_err();

        assert!(matches!(err, SyncError::Auth(_)));
        assert!(err.to_string().contains("refresh token"));
    }

    #[test]
    fn token_error_body_is_summarized() {
        let detail = describe_token_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );

        assert_eq!(
            detail,
            "HTTP 400: Token has been expired or revoked. (invalid_grant)"
        );
        assert_eq!(describe_token_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[test]
    fn auth_url_requests_offline_tasks_scope() {
        let url = build_auth_url("cid", "http://127.0.0.1:5555", "st4te").unwrap();

        assert!(url.starts_with(OAUTH_AUTH_URL));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("state=st4te"));
        assert!(url.contains("tasks"));
    }
}
