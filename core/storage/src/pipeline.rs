//! Order upload pipeline.
//!
//! Maps a (customer, order) pair onto `root/{customer}/{order}.{customer}`,
//! makes sure that folder exists, and uploads a batch of files into it.
//! Failures of individual files are reported per file and never abort the
//! rest of the batch.

use chrono::Utc;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use drivelink_common::{sanitize, Error, RemotePath, Result};

use crate::config::GraphConfig;
use crate::graph::{DriveClient, DriveItem, GraphExecutor, Payload, TokenManager};

/// Fallback content type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// One file to upload.
#[derive(Debug)]
pub struct FileUpload {
    /// Requested file name; sanitized before use.
    pub name: String,
    /// Explicit content type. Inferred from the name when unset.
    pub content_type: Option<String>,
    pub payload: Payload,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            payload,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A batch of files for one order.
#[derive(Debug, Default)]
pub struct OrderUpload {
    pub customer: String,
    pub order_no: String,
    pub files: Vec<FileUpload>,
    /// Structured metadata uploaded as a JSON manifest next to the files.
    pub metadata: Option<serde_json::Value>,
    /// Known order folder ID; skips the folder ensure step.
    pub folder_id: Option<String>,
}

/// Outcome of one file upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub remote_id: Option<String>,
    pub display_name: String,
    pub canonical_url: Option<String>,
    pub size: u64,
    pub content_type: Option<String>,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResult {
    fn uploaded(item: DriveItem, requested_name: String, size: u64, content_type: String) -> Self {
        Self {
            remote_id: Some(item.id),
            display_name: if item.name.is_empty() {
                requested_name
            } else {
                item.name
            },
            canonical_url: item.web_url,
            size: item.size.unwrap_or(size),
            content_type: Some(content_type),
            succeeded: true,
            error: None,
        }
    }

    fn failed(name: String, err: &Error) -> Self {
        Self {
            remote_id: None,
            display_name: name,
            canonical_url: None,
            size: 0,
            content_type: None,
            succeeded: false,
            error: Some(err.to_string()),
        }
    }
}

/// Outcome of the metadata manifest upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestReport {
    pub name: String,
    pub succeeded: bool,
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of [`DrivePipeline::upload_order`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// At least one file was submitted and all of them succeeded.
    pub ok: bool,
    pub customer: String,
    pub order_no: String,
    pub folder_id: String,
    pub created_customer: bool,
    pub created_order: bool,
    /// Number of files that succeeded.
    pub uploaded_count: usize,
    /// Per-file results in submission order.
    pub uploaded: Vec<UploadResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestReport>,
}

/// A child of the order folder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteEntry {
    pub id: Option<String>,
    pub name: String,
    pub size: u64,
    pub web_url: Option<String>,
    pub content_type: Option<String>,
}

impl From<DriveItem> for RemoteEntry {
    fn from(item: DriveItem) -> Self {
        let content_type = item.mime_type().map(String::from);
        Self {
            id: Some(item.id).filter(|id| !id.is_empty()),
            name: item.name,
            size: item.size.unwrap_or(0),
            web_url: item.web_url,
            content_type,
        }
    }
}

/// Result of [`DrivePipeline::check_order`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderReport {
    pub customer: String,
    pub order_no: String,
    pub folder_id: Option<String>,
    pub folder_exists: bool,
    pub has_photos: bool,
    pub photo_count: usize,
    pub files: Vec<RemoteEntry>,
}

impl FolderReport {
    fn missing(customer: String, order_no: &str) -> Self {
        Self {
            customer,
            order_no: order_no.to_string(),
            folder_id: None,
            folder_exists: false,
            has_photos: false,
            photo_count: 0,
            files: Vec::new(),
        }
    }
}

/// Top-level client: owns the credential cache, the executor and the
/// drive client.
pub struct DrivePipeline {
    config: GraphConfig,
    drive: DriveClient,
    root: RemotePath,
}

impl DrivePipeline {
    /// Build a pipeline from validated configuration.
    ///
    /// # Errors
    /// - Configuration is invalid
    /// - The HTTP client cannot be constructed
    pub fn new(config: GraphConfig) -> Result<Self> {
        config.validate()?;

        let http = Client::builder()
            .user_agent(concat!("drivelink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let tokens = Arc::new(TokenManager::new(http.clone(), &config));
        let executor = Arc::new(GraphExecutor::new(
            http,
            config.graph_base.clone(),
            tokens,
            config.retry.clone(),
            config.request_timeout,
        ));
        let drive = DriveClient::new(executor, &config);
        let root = RemotePath::from_prefix(&config.root_path);

        Ok(Self {
            config,
            drive,
            root,
        })
    }

    /// Name of the order folder: `{order_no}.{customer}`.
    pub fn order_folder_name(customer: &str, order_no: &str) -> String {
        sanitize(&format!("{}.{}", order_no.trim(), sanitize(customer)))
    }

    /// `root/{customer}/{order_no}.{customer}`.
    ///
    /// # Errors
    /// - Customer or order number is empty after sanitization
    pub fn order_path(&self, customer: &str, order_no: &str) -> Result<RemotePath> {
        if sanitize(order_no).is_empty() {
            return Err(Error::InvalidInput("Order number is empty".to_string()));
        }
        self.root
            .child(customer)?
            .child(&Self::order_folder_name(customer, order_no))
    }

    /// Upload a batch of files for one order.
    ///
    /// # Errors
    /// - Customer or order number is empty
    /// - The order folder could not be ensured (no file is attempted)
    ///
    /// Individual file failures are reported in [`BatchReport::uploaded`].
    pub async fn upload_order(&self, order: OrderUpload) -> Result<BatchReport> {
        let OrderUpload {
            customer,
            order_no,
            files,
            metadata,
            folder_id,
        } = order;

        let order_path = self.order_path(&customer, &order_no)?;
        let customer = sanitize(&customer);
        let order_no = order_no.trim().to_string();

        info!(
            "Uploading {} file(s) for order {} of {}",
            files.len(),
            order_no,
            customer
        );

        let (folder_id, created_customer, created_order) = match folder_id {
            Some(id) => (id, false, false),
            None => {
                let folder_name = Self::order_folder_name(&customer, &order_no);
                let ensured = self
                    .drive
                    .ensure_folder(&self.root, &customer, &folder_name)
                    .await
                    .map_err(|e| {
                        error!("Folder ensure failed for {}: {}", order_path, e);
                        e
                    })?;
                info!(
                    "Order folder {} ready (created customer: {}, created order: {})",
                    ensured.folder_id, ensured.created_container, ensured.created_child
                );
                (
                    ensured.folder_id,
                    ensured.created_container,
                    ensured.created_child,
                )
            }
        };

        let manifest = match metadata.filter(has_content) {
            Some(metadata) => Some(self.upload_manifest(&order_path, &order_no, &metadata).await),
            None => None,
        };

        let concurrency = self.config.upload_concurrency.max(1);
        let uploaded: Vec<UploadResult> = futures::stream::iter(
            files
                .into_iter()
                .enumerate()
                .map(|(i, file)| self.upload_file(&order_path, i + 1, file)),
        )
        .buffered(concurrency)
        .collect()
        .await;

        let uploaded_count = uploaded.iter().filter(|u| u.succeeded).count();
        let ok = !uploaded.is_empty() && uploaded_count == uploaded.len();
        info!(
            "Order {} of {}: {}/{} file(s) uploaded",
            order_no,
            customer,
            uploaded_count,
            uploaded.len()
        );

        Ok(BatchReport {
            ok,
            customer,
            order_no,
            folder_id,
            created_customer,
            created_order,
            uploaded_count,
            uploaded,
            manifest,
        })
    }

    async fn upload_file(&self, folder: &RemotePath, index: usize, file: FileUpload) -> UploadResult {
        let name = match sanitize(&file.name) {
            clean if clean.is_empty() => format!("file_{}", index),
            clean => clean,
        };
        let content_type = file
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| guess_content_type(&name));
        let size = file.payload.size();

        let result = match folder.child(&name) {
            Ok(destination) => {
                self.drive
                    .upload(&destination, file.payload, &content_type)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(item) => {
                info!("Uploaded {} -> {}", name, item.web_url.as_deref().unwrap_or("-"));
                UploadResult::uploaded(item, name, size, content_type)
            }
            Err(e) => {
                error!("Upload of {} failed: {}", name, e);
                UploadResult::failed(name, &e)
            }
        }
    }

    async fn upload_manifest(
        &self,
        folder: &RemotePath,
        order_no: &str,
        metadata: &serde_json::Value,
    ) -> ManifestReport {
        let name = sanitize(&manifest_name(order_no));
        match self.put_manifest(folder, &name, metadata).await {
            Ok(item) => {
                info!("Uploaded manifest {}", name);
                ManifestReport {
                    name,
                    succeeded: true,
                    remote_id: Some(item.id),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Manifest {} skipped: {}", name, e);
                ManifestReport {
                    name,
                    succeeded: false,
                    remote_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn put_manifest(
        &self,
        folder: &RemotePath,
        name: &str,
        metadata: &serde_json::Value,
    ) -> Result<DriveItem> {
        let body = serde_json::to_vec_pretty(metadata)?;
        let destination = folder.child(name)?;
        self.drive
            .upload(&destination, Payload::from_bytes(body), "application/json")
            .await
    }

    /// Report whether the order folder exists and what it contains.
    ///
    /// # Errors
    /// - Customer or order number is empty
    /// - Lookup failed with a status other than 404
    pub async fn check_order(&self, customer: &str, order_no: &str) -> Result<FolderReport> {
        let path = self.order_path(customer, order_no)?;
        let customer = sanitize(customer);
        let order_no = order_no.trim();
        info!("Checking order folder {}", path);

        let folder = match self.drive.lookup_with_children(&path).await? {
            Some(item) if item.is_folder() => item,
            Some(_) => {
                info!("{} exists but is not a folder", path);
                return Ok(FolderReport::missing(customer, order_no));
            }
            None => {
                info!("{} not found", path);
                return Ok(FolderReport::missing(customer, order_no));
            }
        };

        let photo_count = folder
            .children
            .iter()
            .filter(|child| child.mime_type().is_some_and(|m| m.starts_with("image/")))
            .count();
        info!("{} holds {} photo(s)", path, photo_count);

        Ok(FolderReport {
            customer,
            order_no: order_no.to_string(),
            folder_id: Some(folder.id),
            folder_exists: true,
            has_photos: photo_count > 0,
            photo_count,
            files: folder.children.into_iter().map(RemoteEntry::from).collect(),
        })
    }
}

/// Metadata worth a manifest: anything but `null` and `{}`.
fn has_content(metadata: &serde_json::Value) -> bool {
    match metadata {
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// `{order_no}_QC_{YYYY-MM-DD}.json`, dated in UTC.
pub fn manifest_name(order_no: &str) -> String {
    format!("{}_QC_{}.json", order_no, Utc::now().format("%Y-%m-%d"))
}

/// Content type from the file extension.
pub fn guess_content_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(OCTET_STREAM)
        .to_string()
}
