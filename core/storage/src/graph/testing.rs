//! Test fixtures: a counting token endpoint and an in-memory fake drive
//! served through wiremock.

use percent_encoding::percent_decode_str;
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use drivelink_common::Secret;

use crate::config::GraphConfig;
use crate::graph::auth::TokenManager;
use crate::graph::http::GraphExecutor;
use crate::graph::retry::RetryConfig;

pub const DRIVE_ID: &str = "drive-1";

/// Config pointing both the authority and Graph base at the mock server.
pub fn test_config(server: &MockServer) -> GraphConfig {
    GraphConfig {
        tenant_id: "tenant-1".to_string(),
        client_id: "client-1".to_string(),
        client_secret: Secret::new("secret-1"),
        drive_id: DRIVE_ID.to_string(),
        root_path: "QC".to_string(),
        graph_base: server.uri(),
        authority: server.uri(),
        retry: RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(Duration::ZERO),
        ..GraphConfig::default()
    }
}

pub fn test_executor(config: &GraphConfig) -> GraphExecutor {
    let http = Client::new();
    let tokens = Arc::new(TokenManager::new(http.clone(), config));
    GraphExecutor::new(
        http,
        config.graph_base.clone(),
        tokens,
        config.retry.clone(),
        config.request_timeout,
    )
}

/// Shared call counter.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct TokenResponder {
    counter: Counter,
    expires_in: u64,
}

impl Respond for TokenResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.counter.bump();
        ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": format!("token-{}", n),
            "expires_in": self.expires_in,
        }))
    }
}

/// Token endpoint issuing `token-1`, `token-2`, ... in order.
pub async fn mount_token_endpoint(server: &MockServer, expires_in: u64) -> Counter {
    let counter = Counter::default();
    Mock::given(method("POST"))
        .and(path("/tenant-1/oauth2/v2.0/token"))
        .respond_with(TokenResponder {
            counter: counter.clone(),
            expires_in,
        })
        .mount(server)
        .await;
    counter
}

#[derive(Debug, Clone)]
pub struct FakeItem {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
    pub size: u64,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone)]
struct FakeSession {
    path: String,
    total: u64,
    received: u64,
}

#[derive(Default)]
struct DriveState {
    items: HashMap<String, FakeItem>,
    sessions: HashMap<String, FakeSession>,
    next_id: usize,
}

/// Minimal path-addressed drive: lookups, conflict-renaming creates,
/// deletes by ID, simple uploads and resumable sessions.
#[derive(Clone)]
pub struct FakeDrive {
    base_uri: String,
    state: Arc<Mutex<DriveState>>,
    pub folder_creates: Counter,
    pub chunk_puts: Counter,
    pub session_creates: Counter,
    pub content_puts: Counter,
    pub deletes: Counter,
}

impl FakeDrive {
    /// Mount a fake drive on the server (token endpoint included).
    pub async fn mount(server: &MockServer) -> Self {
        mount_token_endpoint(server, 3600).await;
        let drive = Self {
            base_uri: server.uri(),
            state: Arc::new(Mutex::new(DriveState::default())),
            folder_creates: Counter::default(),
            chunk_puts: Counter::default(),
            session_creates: Counter::default(),
            content_puts: Counter::default(),
            deletes: Counter::default(),
        };
        Mock::given(path_regex(r"^/drives/drive-1/root"))
            .respond_with(drive.clone())
            .mount(server)
            .await;
        Mock::given(path_regex(r"^/drives/drive-1/items/"))
            .respond_with(drive.clone())
            .mount(server)
            .await;
        Mock::given(path_regex(r"^/upload/"))
            .respond_with(drive.clone())
            .mount(server)
            .await;
        drive
    }

    /// Pre-create a folder at a `/`-separated path (parents included).
    pub fn add_folder(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = if current.is_empty() {
                segment.to_string()
            } else {
                format!("{}/{}", current, segment)
            };
            if !state.items.contains_key(&current) {
                insert_item(&mut state, &current, true, 0, None);
            }
        }
    }

    pub fn item(&self, path: &str) -> Option<FakeItem> {
        self.state.lock().unwrap().items.get(path).cloned()
    }

    /// Paths of every stored item, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.state.lock().unwrap().items.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn handle(&self, request: &Request) -> ResponseTemplate {
        let raw_path = request.url.path();
        let decoded = percent_decode_str(raw_path).decode_utf8_lossy().into_owned();

        if let Some(session_id) = decoded.strip_prefix("/upload/") {
            return self.put_chunk(session_id, request);
        }
        if let Some(id) = decoded.strip_prefix("/drives/drive-1/items/") {
            return match request.method.as_str() {
                "DELETE" => self.delete_item(id),
                _ => ResponseTemplate::new(400),
            };
        }

        let rest = decoded
            .strip_prefix("/drives/drive-1/root")
            .unwrap_or_default()
            .to_string();

        match (request.method.as_str(), rest.as_str()) {
            ("POST", "/children") => self.create_folder("", request),
            (_, r) => {
                let addressed = r.trim_start_matches(':').trim_start_matches('/');
                match addressed.rsplit_once(":/") {
                    Some((parent, "children")) if request.method.as_str() == "POST" => {
                        self.create_folder(parent, request)
                    }
                    Some((target, "content")) if request.method.as_str() == "PUT" => {
                        self.put_content(target, request)
                    }
                    Some((target, "createUploadSession")) if request.method.as_str() == "POST" => {
                        self.create_session(target)
                    }
                    _ if request.method.as_str() == "GET" => self.lookup(addressed.trim_end_matches(':')),
                    _ => ResponseTemplate::new(400),
                }
            }
        }
    }

    fn lookup(&self, path: &str) -> ResponseTemplate {
        let state = self.state.lock().unwrap();
        match state.items.get(path) {
            Some(item) => {
                let children: Vec<_> = state
                    .items
                    .iter()
                    .filter(|(p, _)| parent_of(p) == path)
                    .map(|(_, child)| item_json(child))
                    .collect();
                let mut body = item_json(item);
                body["children"] = json!(children);
                ResponseTemplate::new(200).set_body_json(body)
            }
            None => not_found(),
        }
    }

    fn create_folder(&self, parent: &str, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        if body["@microsoft.graph.conflictBehavior"] != "rename" || body.get("folder").is_none() {
            return ResponseTemplate::new(400);
        }
        let name = body["name"].as_str().unwrap_or_default().to_string();

        let mut state = self.state.lock().unwrap();
        if !parent.is_empty() && !state.items.contains_key(parent) {
            return not_found();
        }
        let path = free_path(&state, parent, &name);
        let item = insert_item(&mut state, &path, true, 0, None);
        self.folder_creates.bump();
        ResponseTemplate::new(201).set_body_json(item_json(&item))
    }

    fn delete_item(&self, id: &str) -> ResponseTemplate {
        self.deletes.bump();
        let mut state = self.state.lock().unwrap();
        let Some(path) = state
            .items
            .iter()
            .find(|(_, item)| item.id == id)
            .map(|(path, _)| path.clone())
        else {
            return not_found();
        };
        let nested = format!("{}/", path);
        state
            .items
            .retain(|p, _| p != &path && !p.starts_with(&nested));
        ResponseTemplate::new(204)
    }

    fn put_content(&self, target: &str, request: &Request) -> ResponseTemplate {
        self.content_puts.bump();
        let mime = header_value(request, "content-type");
        let mut state = self.state.lock().unwrap();
        let (parent, name) = target.rsplit_once('/').unwrap_or(("", target));
        if !parent.is_empty() && !state.items.contains_key(parent) {
            return not_found();
        }
        let path = free_path(&state, parent, name);
        let item = insert_item(&mut state, &path, false, request.body.len() as u64, mime);
        ResponseTemplate::new(201).set_body_json(item_json(&item))
    }

    fn create_session(&self, target: &str) -> ResponseTemplate {
        let n = self.session_creates.bump();
        let id = format!("session-{}", n);
        self.state.lock().unwrap().sessions.insert(
            id.clone(),
            FakeSession {
                path: target.to_string(),
                total: 0,
                received: 0,
            },
        );
        ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/upload/{}?tempauth=xyz", self.base_uri, id),
            "expirationDateTime": "2030-01-01T00:00:00Z",
        }))
    }

    fn put_chunk(&self, session_id: &str, request: &Request) -> ResponseTemplate {
        self.chunk_puts.bump();
        if request.headers.get("authorization").is_some() {
            return ResponseTemplate::new(401);
        }
        let Some((start, end, total)) = header_value(request, "content-range")
            .as_deref()
            .and_then(parse_content_range)
        else {
            return ResponseTemplate::new(400);
        };

        let mut state = self.state.lock().unwrap();
        let Some(session) = state.sessions.get_mut(session_id) else {
            return not_found();
        };
        if start != session.received || end + 1 - start != request.body.len() as u64 {
            return ResponseTemplate::new(416);
        }
        session.total = total;
        session.received = end + 1;

        if session.received < total {
            return ResponseTemplate::new(202).set_body_json(json!({
                "nextExpectedRanges": [format!("{}-", session.received)],
            }));
        }

        let session = session.clone();
        state.sessions.remove(session_id);
        let mime = header_value(request, "content-type");
        let (parent, name) = session.path.rsplit_once('/').unwrap_or(("", &session.path));
        let path = free_path(&state, parent, name);
        let item = insert_item(&mut state, &path, false, session.total, mime);
        ResponseTemplate::new(201).set_body_json(item_json(&item))
    }
}

impl Respond for FakeDrive {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.handle(request)
    }
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Parse `bytes {start}-{end}/{total}`.
pub fn parse_content_range(value: &str) -> Option<(u64, u64, u64)> {
    let range = value.strip_prefix("bytes ")?;
    let (span, total) = range.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?, total.parse().ok()?))
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Conflict-rename: `name`, then `name 1`, `name 2`, ...
fn free_path(state: &DriveState, parent: &str, name: &str) -> String {
    let mut candidate = join_path(parent, name);
    let mut n = 1;
    while state.items.contains_key(&candidate) {
        candidate = join_path(parent, &format!("{} {}", name, n));
        n += 1;
    }
    candidate
}

fn insert_item(
    state: &mut DriveState,
    path: &str,
    is_folder: bool,
    size: u64,
    mime_type: Option<String>,
) -> FakeItem {
    state.next_id += 1;
    let item = FakeItem {
        id: format!("item-{}", state.next_id),
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        is_folder,
        size,
        mime_type,
    };
    state.items.insert(path.to_string(), item.clone());
    item
}

fn item_json(item: &FakeItem) -> serde_json::Value {
    let mut body = json!({
        "id": item.id,
        "name": item.name,
        "size": item.size,
        "webUrl": format!("https://contoso.sharepoint.com/{}", item.id),
    });
    if item.is_folder {
        body["folder"] = json!({});
    } else {
        body["file"] = json!({ "mimeType": item.mime_type });
    }
    body
}

fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "error": {"code": "itemNotFound", "message": "The resource could not be found."}
    }))
}
