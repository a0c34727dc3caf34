//! Graph drive resource shapes used by the pipeline.

use serde::{Deserialize, Serialize};

/// Key that asks the drive to auto-rename on a name collision.
pub const CONFLICT_BEHAVIOR_KEY: &str = "@microsoft.graph.conflictBehavior";

/// Folder facet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default)]
    pub child_count: Option<u64>,
}

/// File facet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Drive item metadata from the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    /// Item ID.
    pub id: String,
    /// Final item name (may differ from the requested name after a
    /// conflict rename).
    #[serde(default)]
    pub name: String,
    /// Browser URL of the item.
    #[serde(default)]
    pub web_url: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Present when the item is a folder.
    #[serde(default)]
    pub folder: Option<FolderFacet>,
    /// Present when the item is a file.
    #[serde(default)]
    pub file: Option<FileFacet>,
    /// Expanded children, when requested with `$expand=children`.
    #[serde(default)]
    pub children: Vec<DriveItem>,
}

impl DriveItem {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    /// MIME type of a file item.
    pub fn mime_type(&self) -> Option<&str> {
        self.file.as_ref().and_then(|f| f.mime_type.as_deref())
    }
}

/// Response of `createUploadSession`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionResponse {
    pub upload_url: String,
    #[serde(default)]
    pub expiration_date_time: Option<String>,
}

/// Intermediate chunk acknowledgement (202).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    #[serde(default)]
    pub next_expected_ranges: Vec<String>,
}

impl ChunkAck {
    /// Start offset of the first range the server still expects.
    pub fn next_offset(&self) -> Option<u64> {
        self.next_expected_ranges
            .first()
            .and_then(|range| range.split('-').next())
            .and_then(|start| start.parse().ok())
    }
}

/// Graph error envelope: `{ "error": { "code": .., "message": .. } }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Human-readable detail for an error response body.
///
/// Uses `code: message` from the Graph error envelope when present,
/// otherwise the raw body.
pub fn error_detail(body: &[u8]) -> String {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
        let code = envelope.error.code.unwrap_or_default();
        let message = envelope
            .error
            .message
            .map(|m| m.trim().to_string())
            .unwrap_or_default();
        if !code.is_empty() || !message.is_empty() {
            return format!("{}: {}", code, message);
        }
    }
    String::from_utf8_lossy(body).into_owned()
}
