//! Idempotent two-level folder creation (`root/container/child`).

use serde::Serialize;
use tracing::{info, warn};

use drivelink_common::{Error, RemotePath, Result};

use super::client::DriveClient;
use super::models::DriveItem;

/// Result of [`DriveClient::ensure_folder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnsuredFolder {
    /// ID of the child folder.
    pub folder_id: String,
    /// Requested path of the child folder.
    pub path: RemotePath,
    /// This call created the container folder.
    pub created_container: bool,
    /// This call created the child folder.
    pub created_child: bool,
}

impl DriveClient {
    /// Make sure `root/container/child` exists, creating only what is missing.
    ///
    /// Calling it again with the same names returns the same folder ID with
    /// both flags false. Calls sharing this client are serialized. A create
    /// that the drive renamed because another writer got there first is
    /// deleted again and the existing folder is used instead.
    ///
    /// # Errors
    /// - A name is empty after sanitization
    /// - Lookup failed with a status other than 404
    /// - Container creation failed
    /// - The container disappeared before the child could be created
    /// - Child creation failed and the child still cannot be found
    pub async fn ensure_folder(
        &self,
        root: &RemotePath,
        container: &str,
        child: &str,
    ) -> Result<EnsuredFolder> {
        let container_path = root.child(container)?;
        let full_path = container_path.child(child)?;

        let _guard = self.ensure_lock.lock().await;

        if let Some(existing) = self.lookup_folder(&full_path).await? {
            return Ok(EnsuredFolder {
                folder_id: existing.id,
                path: full_path,
                created_container: false,
                created_child: false,
            });
        }

        let created_container = match self.lookup_folder(&container_path).await? {
            Some(_) => false,
            None => self.create_required(root, &container_path).await?,
        };

        if let Some(existing) = self.lookup_folder(&full_path).await? {
            return Ok(EnsuredFolder {
                folder_id: existing.id,
                path: full_path,
                created_container,
                created_child: false,
            });
        }

        let name = full_path.name().unwrap_or_default();
        let response = self.create_folder(&container_path, name).await?;
        let failed = if matches!(response.status, 200 | 201) {
            let item: DriveItem = response.json()?;
            if item.name == name {
                info!("Created folder {} ({})", full_path, item.id);
                return Ok(EnsuredFolder {
                    folder_id: item.id,
                    path: full_path,
                    created_container,
                    created_child: true,
                });
            }
            self.discard_duplicate(&full_path, &item).await;
            None
        } else {
            warn!(
                "Creating {} returned {}, re-resolving",
                full_path, response.status
            );
            Some(response)
        };

        if let Some(existing) = self.lookup_folder(&full_path).await? {
            return Ok(EnsuredFolder {
                folder_id: existing.id,
                path: full_path,
                created_container,
                created_child: false,
            });
        }

        Err(match failed {
            Some(response) if response.status == 404 => {
                Error::NotFound(format!("Folder {} no longer exists", container_path))
            }
            Some(response) => response.into_error(),
            None => Error::NotFound(format!(
                "Folder {} was renamed on create but cannot be found",
                full_path
            )),
        })
    }

    /// Create a folder that must exist afterwards.
    ///
    /// Returns false when another writer created it first.
    async fn create_required(&self, parent: &RemotePath, path: &RemotePath) -> Result<bool> {
        let name = path
            .name()
            .ok_or_else(|| Error::InvalidInput("Cannot create the drive root".to_string()))?;
        let response = self.create_folder(parent, name).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        let item: DriveItem = response.json()?;
        if item.name != name {
            self.discard_duplicate(path, &item).await;
            return Ok(false);
        }
        info!("Created folder {} ({})", path, item.id);
        Ok(true)
    }

    /// Remove a folder the drive created under a conflict-renamed name.
    async fn discard_duplicate(&self, wanted: &RemotePath, duplicate: &DriveItem) {
        warn!(
            "{} already exists, removing duplicate {} ({})",
            wanted, duplicate.name, duplicate.id
        );
        if let Err(e) = self.delete_item(&duplicate.id).await {
            warn!("Failed to remove duplicate folder {}: {}", duplicate.id, e);
        }
    }
}
