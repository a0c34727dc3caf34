//! Path-addressed drive client on top of the request executor.

use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use drivelink_common::{RemotePath, Result};

use crate::config::GraphConfig;
use super::http::{GraphExecutor, GraphRequest, GraphResponse};
use super::models::{DriveItem, CONFLICT_BEHAVIOR_KEY};

/// Drive operations addressed by [`RemotePath`].
///
/// Cheap to clone; clones share the executor, its credential cache and the
/// folder-creation lock.
#[derive(Clone)]
pub struct DriveClient {
    executor: Arc<GraphExecutor>,
    drive_id: String,
    pub(crate) ensure_lock: Arc<Mutex<()>>,
    pub(crate) small_upload_threshold: u64,
    pub(crate) chunk_size: usize,
    pub(crate) upload_timeout: Duration,
}

impl DriveClient {
    /// Create a client for the configured drive.
    pub fn new(executor: Arc<GraphExecutor>, config: &GraphConfig) -> Self {
        Self {
            executor,
            drive_id: config.drive_id.clone(),
            ensure_lock: Arc::new(Mutex::new(())),
            small_upload_threshold: config.small_upload_threshold,
            chunk_size: config.chunk_size,
            upload_timeout: config.upload_timeout,
        }
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }

    /// `/drives/{drive}/root` or `/drives/{drive}/root:/{path}`.
    pub fn item_endpoint(&self, path: &RemotePath) -> String {
        if path.is_root() {
            format!("/drives/{}/root", self.drive_id)
        } else {
            format!("/drives/{}/root:/{}", self.drive_id, path.encoded())
        }
    }

    /// Endpoint listing or creating children of `parent`.
    pub fn children_endpoint(&self, parent: &RemotePath) -> String {
        if parent.is_root() {
            format!("/drives/{}/root/children", self.drive_id)
        } else {
            format!("/drives/{}/root:/{}:/children", self.drive_id, parent.encoded())
        }
    }

    /// `/drives/{drive}/items/{id}`.
    pub fn item_id_endpoint(&self, id: &str) -> String {
        format!("/drives/{}/items/{}", self.drive_id, id)
    }

    pub fn content_endpoint(&self, path: &RemotePath) -> String {
        format!("/drives/{}/root:/{}:/content", self.drive_id, path.encoded())
    }

    pub fn session_endpoint(&self, path: &RemotePath) -> String {
        format!(
            "/drives/{}/root:/{}:/createUploadSession",
            self.drive_id,
            path.encoded()
        )
    }

    /// Look up an item by path.
    ///
    /// Returns `None` on 404.
    ///
    /// # Errors
    /// - Any non-2xx status other than 404, with the Graph error detail
    pub async fn lookup(&self, path: &RemotePath) -> Result<Option<DriveItem>> {
        self.lookup_with(GraphRequest::get(self.item_endpoint(path))).await
    }

    /// Look up a folder together with its children.
    pub async fn lookup_with_children(&self, path: &RemotePath) -> Result<Option<DriveItem>> {
        let request = GraphRequest::get(self.item_endpoint(path))
            .query("$select", "id,name,webUrl,folder")
            .query("$expand", "children($select=id,name,size,webUrl,file,folder)");
        self.lookup_with(request).await
    }

    /// Look up a path and keep it only if it is a folder.
    pub async fn lookup_folder(&self, path: &RemotePath) -> Result<Option<DriveItem>> {
        Ok(self.lookup(path).await?.filter(DriveItem::is_folder))
    }

    async fn lookup_with(&self, request: GraphRequest) -> Result<Option<DriveItem>> {
        let response = self.executor.execute(&request).await?;
        match response.status {
            404 => {
                debug!("{} not found", request.target);
                Ok(None)
            }
            _ if response.is_success() => Ok(Some(response.json()?)),
            _ => Err(response.into_error()),
        }
    }

    /// Request creation of folder `name` under `parent` with conflict-rename.
    ///
    /// The raw response is returned so callers can decide how to treat
    /// a failed create.
    pub async fn create_folder(&self, parent: &RemotePath, name: &str) -> Result<GraphResponse> {
        let body = serde_json::json!({
            "name": name,
            "folder": {},
            CONFLICT_BEHAVIOR_KEY: "rename",
        });
        self.executor
            .execute(&GraphRequest::post(self.children_endpoint(parent)).json(body))
            .await
    }

    /// Delete an item by ID. A missing item counts as deleted.
    pub async fn delete_item(&self, id: &str) -> Result<()> {
        let request = GraphRequest::new(Method::DELETE, self.item_id_endpoint(id));
        let response = self.executor.execute(&request).await?;
        if response.is_success() || response.status == 404 {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }
}
